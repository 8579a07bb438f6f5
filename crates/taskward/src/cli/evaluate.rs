//! Evaluate command handler.

use std::path::{Path, PathBuf};
use taskward_policy::{Decision, EngineConfig, PolicyRegistry, PolicyRequest};

use super::{drain_audit, open_registry};

/// Handles the evaluate command.
///
/// Reads a JSON `PolicyRequest`, prints the resulting `Decision` as JSON and
/// flushes the audit sink before returning.
#[tracing::instrument(skip_all, fields(request = %path.display()))]
pub async fn handle_evaluate_command(config: &EngineConfig, path: PathBuf) -> anyhow::Result<()> {
    let request = read_request(&path)?;
    let registry = open_registry(config)?;

    let decision = evaluate(&registry, &request);
    drain_audit(&registry).await?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn read_request(path: &Path) -> anyhow::Result<PolicyRequest> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let request = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Invalid request in {}: {}", path.display(), e))?;
    Ok(request)
}

fn evaluate(registry: &PolicyRegistry, request: &PolicyRequest) -> Decision {
    let decision = registry.evaluate_request(request);
    match decision.denial() {
        Some(denial) => tracing::info!(reason = denial.reason(), "Request denied"),
        None => tracing::info!("Request allowed"),
    }
    decision
}
