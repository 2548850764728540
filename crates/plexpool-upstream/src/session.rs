//! The `Session` trait and session credentials.
//!
//! A session is one authenticated cookie bundle against the upstream
//! engine. The pool schedules over `Arc<dyn Session>` handles so tests can
//! substitute [`crate::MockSession`] for the HTTP implementation.

use crate::error::Result;
use crate::types::{RateLimits, SearchRequest, SearchResponse};
use std::fmt;

/// Cookie credentials for one upstream session.
///
/// Construction clones the caller's strings; a session never shares cookie
/// state with its creator or with other sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// CSRF double-submit cookie value
    pub csrf_token: String,
    /// Authenticated session cookie value
    pub session_token: String,
}

impl SessionCredentials {
    /// Create credentials from cookie values.
    #[must_use]
    pub fn new(csrf_token: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            csrf_token: csrf_token.into(),
            session_token: session_token.into(),
        }
    }

    /// Empty credentials for the anonymous one-shot fallback session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            csrf_token: String::new(),
            session_token: String::new(),
        }
    }

    /// Whether both cookie values are empty.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.csrf_token.is_empty() && self.session_token.is_empty()
    }
}

// SECURITY: never print cookie values; Debug shows masked previews only.
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("csrf_token", &mask_token(&self.csrf_token))
            .field("session_token", &mask_token(&self.session_token))
            .finish()
    }
}

/// Mask a secret for logging: first 4 and last 4 characters around "...".
#[must_use]
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    if token.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

/// One upstream session: a search capability and a zero-cost quota probe.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Masked identity for logs and diagnostics.
    fn identity(&self) -> String;

    /// Run one query to completion.
    ///
    /// Returns only when the upstream stream terminated with its
    /// end-of-stream marker; a stream that closes early fails with
    /// [`crate::Error::EmptyResponse`].
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    /// Read the session's quota counters without consuming any quota.
    async fn fetch_rate_limits(&self) -> Result<RateLimits>;
}
