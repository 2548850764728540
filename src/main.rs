//! Plexpool - session-pool gateway for the Perplexity answer engine
//!
//! CLI entry point for the admin server and the stdio tool server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod mcp;
mod middleware;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // In MCP mode stdout is the protocol channel, so logs go to a file.
    let is_mcp = std::env::args().any(|a| a == "mcp");

    let data_dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|p| p.join(".plexpool"))
        .unwrap_or_else(|| std::path::PathBuf::from(".plexpool"));
    let _ = std::fs::create_dir_all(&data_dir);

    let (non_blocking, _guard) = if is_mcp {
        let file_appender = tracing_appender::rolling::never(&data_dir, "mcp.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plexpool=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    let cli = cli::Cli::parse();
    cli::run(cli).await
}
