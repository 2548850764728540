//! Admin API module for plexpool
//!
//! Provides REST endpoints for:
//! - Pool status and single-client info
//! - Token CRUD, enable/disable/reset, manual health tests
//! - Monitor and fallback configuration
//! - Query execution (the `run_query` contract over HTTP)

pub mod health;
pub mod query;
pub mod settings;
pub mod tokens;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use plexpool_pool::Error as PoolError;
use plexpool_upstream::Error as UpstreamError;
use serde::Serialize;

pub use health::health_routes;
pub use query::query_routes;
pub use settings::settings_routes;
pub use tokens::tokens_routes;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new()
        .merge(tokens_routes())
        .merge(settings_routes())
        .merge(query_routes())
}

/// JSON error envelope returned by all API handlers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Pool/upstream errors mapped onto HTTP statuses.
pub struct ApiError(pub PoolError);

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PoolError::Upstream(UpstreamError::Validation(_)) => StatusCode::BAD_REQUEST,
            PoolError::UnknownClient(_) => StatusCode::NOT_FOUND,
            PoolError::DuplicateClient(_) => StatusCode::CONFLICT,
            PoolError::AllUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PoolError::Exhausted { .. } | PoolError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PoolError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            success: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                PoolError::Upstream(UpstreamError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                PoolError::UnknownClient("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                PoolError::DuplicateClient("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                PoolError::AllUnavailable {
                    earliest_backoff: None,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PoolError::Exhausted {
                    last: UpstreamError::EmptyResponse,
                    earliest_backoff: None,
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
