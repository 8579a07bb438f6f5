//! Command-line argument definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use taskward_policy::Role;

/// Taskward security policy engine.
#[derive(Parser, Debug)]
#[command(name = "taskward")]
#[command(about = "Inspect and exercise the active security policy")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./taskward.toml when present)
    #[arg(short, long, global = true, env = "TASKWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the active policy: mode, controls, risks and raw parameters
    Describe {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Issue or rotate identity tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Evaluate a JSON-encoded policy request and print the decision
    Evaluate {
        /// Path to the request file
        #[arg(short, long)]
        request: PathBuf,
    },
}

/// Token subcommands.
#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Issue a token for an identity
    Issue {
        /// User identifier
        #[arg(long)]
        user: String,

        /// Organization identifier
        #[arg(long)]
        org: String,

        /// Organization role (viewer, member, admin)
        #[arg(long, default_value = "member")]
        role: Role,

        /// Address the token is issued to
        #[arg(long)]
        ip: Option<IpAddr>,
    },

    /// Rotate a token signed with the configured secret
    Refresh {
        /// Token to rotate
        #[arg(long)]
        token: String,

        /// Address presenting the token
        #[arg(long)]
        ip: Option<IpAddr>,
    },
}

/// Output format for `describe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Human,
    /// Pretty-printed JSON
    Json,
    /// TOML
    Toml,
}
