//! Server module for plexpool
//!
//! Builds the pool from the master config, spawns the health monitor, and
//! runs the admin HTTP server until shutdown.

use crate::middleware::AdminToken;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use plexpool_pool::{ClientPool, Monitor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Run the admin server until ctrl-c.
pub async fn run(config_path: PathBuf, state_path: PathBuf, listen: String) -> Result<()> {
    info!(
        "Starting plexpool v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let pool = Arc::new(ClientPool::load_http(config_path, state_path).await);
    if pool.is_empty().await {
        warn!("pool is empty; add tokens via the admin API before querying");
    }

    let monitor = Monitor::new(Arc::clone(&pool)).spawn();

    let admin_token = AdminToken::from_env();

    let app = Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::api::api_router())
        .layer(Extension(Arc::clone(&pool)))
        .layer(Extension(admin_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = listen.parse().context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("admin server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down");
    monitor.stop().await;
    if let Err(e) = pool.save_state_now().await {
        warn!(error = %e, "final state snapshot failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
    }
}
