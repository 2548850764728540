//! Token management endpoints: CRUD, enable/disable/reset, manual tests,
//! export/import.
//!
//! Reads are open; anything that mutates the pool or reveals credentials
//! requires the admin bearer token.

use crate::api::ApiError;
use crate::middleware::RequireAdmin;
use axum::extract::{Extension, Path};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use plexpool_pool::{
    run_health_check, CheckOutcome, ClientPool, ClientStatus, TokenEntry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Response for GET /api/v1/pool
#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub clients: Vec<ClientStatus>,
}

/// Body for POST /api/v1/tokens
#[derive(Debug, Deserialize)]
pub struct AddTokenRequest {
    pub id: String,
    pub csrf_token: String,
    pub session_token: String,
}

/// Generic mutation acknowledgement
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

/// Response for POST /api/v1/tokens/import
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub added: usize,
    pub skipped: usize,
}

/// GET /api/v1/pool — full pool snapshot.
async fn get_pool(Extension(pool): Extension<Arc<ClientPool>>) -> Json<PoolResponse> {
    pool.refresh_from_state().await;
    Json(PoolResponse {
        clients: pool.statuses().await,
    })
}

/// GET /api/v1/tokens/:id — one client's status.
async fn get_token(
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<ClientStatus>, ApiError> {
    pool.refresh_from_state().await;
    Ok(Json(pool.status_of(&id).await?))
}

/// POST /api/v1/tokens — add a token and health-check it immediately so
/// its validity and quota are known without waiting for the monitor.
async fn add_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Json(body): Json<AddTokenRequest>,
) -> Result<Json<ClientStatus>, ApiError> {
    pool.add_token(TokenEntry::new(&body.id, &body.csrf_token, &body.session_token))
        .await?;
    run_health_check(&pool, Some(&body.id)).await;
    info!(id = %body.id, "token added via admin API");
    Ok(Json(pool.status_of(&body.id).await?))
}

/// DELETE /api/v1/tokens/:id
async fn remove_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    pool.remove(&id).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/tokens/:id/enable
async fn enable_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    pool.set_enabled(&id, true).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/tokens/:id/disable
async fn disable_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    pool.set_enabled(&id, false).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/tokens/:id/reset — clear backoff, rebuild the session.
async fn reset_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    pool.reset(&id).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/tokens/:id/test — immediate single-client health check.
async fn test_token(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CheckOutcome>>, ApiError> {
    pool.status_of(&id).await?;
    Ok(Json(run_health_check(&pool, Some(&id)).await))
}

/// POST /api/v1/tokens/test — immediate health check of every enabled
/// client, regardless of the monitor's enable flag.
async fn test_all_tokens(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
) -> Json<Vec<CheckOutcome>> {
    Json(run_health_check(&pool, None).await)
}

/// GET /api/v1/tokens/export — tokens with credentials, admin only.
async fn export_tokens(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
) -> Json<Vec<TokenEntry>> {
    Json(pool.export().await)
}

/// POST /api/v1/tokens/import
async fn import_tokens(
    _admin: RequireAdmin,
    Extension(pool): Extension<Arc<ClientPool>>,
    Json(tokens): Json<Vec<TokenEntry>>,
) -> Result<Json<ImportResponse>, ApiError> {
    let (added, skipped) = pool.import(tokens).await?;
    info!(added, skipped, "tokens imported via admin API");
    Ok(Json(ImportResponse { added, skipped }))
}

/// Create the token routes.
pub fn tokens_routes() -> Router {
    Router::new()
        .route("/api/v1/pool", get(get_pool))
        .route("/api/v1/tokens", post(add_token))
        .route("/api/v1/tokens/export", get(export_tokens))
        .route("/api/v1/tokens/import", post(import_tokens))
        .route("/api/v1/tokens/test", post(test_all_tokens))
        .route("/api/v1/tokens/:id", get(get_token))
        .route("/api/v1/tokens/:id", delete(remove_token))
        .route("/api/v1/tokens/:id/enable", post(enable_token))
        .route("/api/v1/tokens/:id/disable", post(disable_token))
        .route("/api/v1/tokens/:id/reset", post(reset_token))
        .route("/api/v1/tokens/:id/test", post(test_token))
}
