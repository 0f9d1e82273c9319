//! CLI command definitions for the `lingmo` binary.

pub mod models;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// OpenAI-compatible gateway with quota-aware failover across providers.
#[derive(Parser)]
#[command(name = "lingmo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "LINGMO_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway HTTP server.
    Serve {
        /// Port to listen on (default from config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default from config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// List configured model endpoints with their quota.
    #[command(alias = "ls")]
    Models,

    /// Show router state, settings and data directory.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
