//! Admin authentication middleware for Axum
//!
//! Mutating admin routes require the bearer token from
//! `PPLX_ADMIN_TOKEN`. When the variable is unset, authentication is
//! disabled and every request passes (development mode). Provides the
//! `RequireAdmin` extractor for handlers.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// The configured admin token, shared via request extensions.
#[derive(Clone)]
pub struct AdminToken(Arc<Option<String>>);

impl AdminToken {
    /// Read `PPLX_ADMIN_TOKEN`; empty or unset disables authentication.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var("PPLX_ADMIN_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self(Arc::new(token))
    }

    /// Fixed token (tests).
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self(Arc::new(Some(token.into())))
    }

    /// Auth disabled (tests).
    #[must_use]
    pub fn disabled() -> Self {
        Self(Arc::new(None))
    }

    fn accepts(&self, presented: Option<&str>) -> Result<(), AuthRejection> {
        let Some(expected) = self.0.as_deref() else {
            return Ok(());
        };
        match presented {
            None => Err(AuthRejection::missing()),
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(AuthRejection::invalid()),
        }
    }
}

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

/// Auth rejection type
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl AuthRejection {
    fn missing() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: AuthErrorResponse {
                success: false,
                error: "Authentication required. Provide Authorization: Bearer <token>."
                    .to_string(),
                code: "UNAUTHORIZED".to_string(),
            },
        }
    }

    fn invalid() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: AuthErrorResponse {
                success: false,
                error: "Invalid admin token".to_string(),
                code: "INVALID_CREDENTIALS".to_string(),
            },
        }
    }

    fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: AuthErrorResponse {
                success: false,
                error: msg.to_string(),
                code: "INTERNAL_ERROR".to_string(),
            },
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Axum extractor that requires the admin bearer token on mutating routes.
pub struct RequireAdmin;

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let admin_token = parts
            .extensions
            .get::<AdminToken>()
            .ok_or_else(|| AuthRejection::internal("AdminToken not configured"))?;

        admin_token.accepts(extract_bearer(parts).as_deref())?;
        Ok(RequireAdmin)
    }
}

/// Extract a bearer token from the Authorization header.
fn extract_bearer(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}
