//! Health check endpoint.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use plexpool_pool::ClientPool;
use serde::Serialize;
use std::sync::Arc;

/// Health response with pool headline numbers
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub clients: usize,
    pub monitor_enabled: bool,
}

/// Simple health check (for load balancers)
async fn health_check(Extension(pool): Extension<Arc<ClientPool>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        clients: pool.len().await,
        monitor_enabled: pool.monitor_config().await.enable,
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
