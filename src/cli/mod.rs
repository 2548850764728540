//! CLI module for plexpool
//!
//! Commands:
//! - `serve`: admin HTTP server owning the pool and the health monitor
//! - `mcp`: stdio tool server (JSON-RPC 2.0 over stdin/stdout)

use clap::{Parser, Subcommand};
use plexpool_pool::{DEFAULT_CONFIG_PATH, DEFAULT_STATE_PATH};
use std::path::PathBuf;

/// Plexpool gateway CLI
#[derive(Parser, Debug)]
#[command(name = "plexpool")]
#[command(about = "Session-pool gateway for the Perplexity answer engine")]
#[command(version)]
pub struct Cli {
    /// Master token-pool config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Cross-process pool state file
    #[arg(long, global = true, default_value = DEFAULT_STATE_PATH)]
    pub state: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the admin HTTP server (default)
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8787")]
        listen: String,
    },
    /// Run the stdio tool server
    Mcp,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve { listen }) => crate::server::run(cli.config, cli.state, listen).await,
        Some(Commands::Mcp) => crate::mcp::run(cli.config, cli.state).await,
        None => crate::server::run(cli.config, cli.state, "127.0.0.1:8787".to_string()).await,
    }
}
