//! Taskward - security policy engine command line.
//!
//! Loads the startup configuration, validates the selected security mode and
//! runs one policy operation against it. Logs go to stderr so command output
//! on stdout stays machine-readable.

mod cli;

use clap::Parser;
use cli::{
    Cli, Commands, handle_describe_command, handle_evaluate_command, handle_token_command,
};
use taskward_policy::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::debug!(config_file = ?cli.config, "Loading configuration");
    let config = EngineConfig::load(cli.config.as_deref())?;
    tracing::info!(mode = ?config.mode(), "Configuration loaded");

    if let Err(e) = taskward_policy::init_observability("taskward", config.observability()) {
        tracing::warn!(error = %e, "Metrics export unavailable");
    }

    match cli.command {
        Commands::Describe { format } => handle_describe_command(&config, format)?,
        Commands::Token { action } => handle_token_command(&config, action).await?,
        Commands::Evaluate { request } => handle_evaluate_command(&config, request).await?,
    }

    Ok(())
}
