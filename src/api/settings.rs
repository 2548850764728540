//! Monitor and fallback configuration endpoints.

use crate::api::ApiError;
use crate::middleware::RequireAdmin;
use axum::extract::Extension;
use axum::routing::{get, put};
use axum::{Json, Router};
use plexpool_pool::{ClientPool, FallbackConfig, MonitorConfig};
use std::sync::Arc;
use tracing::info;

/// GET /api/v1/monitor
async fn get_monitor(Extension(pool): Extension<Arc<ClientPool>>) -> Json<MonitorConfig> {
    Json(pool.monitor_config().await)
}

/// PUT /api/v1/monitor — replace the monitor config; a running monitor
/// picks the change up immediately (its sleeping tick is cancelled).
async fn put_monitor(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Json(config): Json<MonitorConfig>,
) -> Result<Json<MonitorConfig>, ApiError> {
    info!(
        enable = config.enable,
        interval_hours = config.interval_hours,
        "monitor reconfigured"
    );
    pool.set_monitor_config(config).await?;
    Ok(Json(pool.monitor_config().await))
}

/// GET /api/v1/fallback
async fn get_fallback(Extension(pool): Extension<Arc<ClientPool>>) -> Json<FallbackConfig> {
    Json(pool.fallback_config().await)
}

/// PUT /api/v1/fallback
async fn put_fallback(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Json(config): Json<FallbackConfig>,
) -> Result<Json<FallbackConfig>, ApiError> {
    pool.set_fallback_config(config).await?;
    Ok(Json(pool.fallback_config().await))
}

/// Create the settings routes.
pub fn settings_routes() -> Router {
    Router::new()
        .route("/api/v1/monitor", get(get_monitor))
        .route("/api/v1/monitor", put(put_monitor))
        .route("/api/v1/fallback", get(get_fallback))
        .route("/api/v1/fallback", put(put_fallback))
}
