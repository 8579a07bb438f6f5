//! Token command handler.

use taskward_policy::{EngineConfig, IdentityClaims};

use super::{TokenAction, drain_audit, open_registry};

/// Handles the token command.
///
/// Prints the issued or rotated token on stdout.
#[tracing::instrument(skip_all)]
pub async fn handle_token_command(config: &EngineConfig, action: TokenAction) -> anyhow::Result<()> {
    let registry = open_registry(config)?;

    let result = match action {
        TokenAction::Issue {
            user,
            org,
            role,
            ip,
        } => {
            let claims = IdentityClaims::new(user, org, role);
            registry.issue_token(&claims, ip)
        }
        TokenAction::Refresh { token, ip } => registry.refresh_token(&token, ip),
    };
    drain_audit(&registry).await?;

    let token = result?;
    println!("{}", token);
    Ok(())
}
