//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the taskward binary.

mod commands;
mod describe;
mod evaluate;
mod token;

pub use commands::{Cli, Commands, OutputFormat, TokenAction};
pub use describe::handle_describe_command;
pub use evaluate::handle_evaluate_command;
pub use token::handle_token_command;

use taskward_policy::{EngineConfig, PolicyRegistry, audit::AuditSink};

/// Build a registry and its audit sink from startup configuration.
pub(crate) fn open_registry(config: &EngineConfig) -> anyhow::Result<PolicyRegistry> {
    let sink = AuditSink::spawn(config.audit_backend()?)?;
    let registry = PolicyRegistry::from_config(config, sink)?;
    tracing::info!(
        mode = %registry.describe_active_policy().mode(),
        "Policy registry ready"
    );
    Ok(registry)
}

/// Flush pending audit records, warning about any left buffered.
pub(crate) async fn drain_audit(registry: &PolicyRegistry) -> anyhow::Result<()> {
    let pending = registry.audit().flush().await?;
    if pending > 0 {
        tracing::warn!(pending, "Audit backend unavailable; records were not delivered");
    }
    Ok(())
}
