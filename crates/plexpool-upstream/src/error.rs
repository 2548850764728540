//! Error types and upstream failure classification for plexpool-upstream.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Upstream error type
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input — rejected before any client is consumed
    #[error("validation error: {0}")]
    Validation(String),

    /// Upstream rejected the session cookies (401/403 or auth-shaped payload)
    #[error("session invalid: {0}")]
    SessionInvalid(String),

    /// Per-session quota exhausted (message matched the quota keyword pattern)
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Deep research request answered with a plain pro-shaped response
    #[error("deep research downgraded to a plain answer")]
    SilentDowngrade,

    /// Stream closed without the end-of-stream marker, or the result was empty
    #[error("empty response: connection dropped before a final answer")]
    EmptyResponse,

    /// Network error or 5xx — retryable against another client
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Request deadline fired
    #[error("timeout after {0}s")]
    Timeout(u64),

    /// Unclassifiable failure
    #[error("upstream error: {0}")]
    Fatal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the per-client quota view should be zeroed for this error.
    #[must_use]
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }

    /// Whether the session itself should be marked invalid.
    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }

    /// Whether this error never consumes a client (surfaced immediately).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

lazy_static! {
    // Full phrases on word boundaries. Bare "pro" or "limit" would falsely
    // match "provide", "process", "unlimited".
    static ref QUOTA_PATTERN: Regex = Regex::new(
        r"(?i)\b(pro queries|pro search|rate[ -]limit|quota|remaining|file upload)\b"
    )
    .expect("quota keyword pattern is valid");
}

/// Whether an upstream error message indicates per-client quota exhaustion.
#[must_use]
pub fn is_quota_message(message: &str) -> bool {
    QUOTA_PATTERN.is_match(message)
}

/// Classify an upstream failure from HTTP status and error message.
///
/// Status wins over message text: auth statuses mark the session invalid,
/// 429 is always quota, 5xx is transient. Without a decisive status the
/// message is run through the quota keyword pattern, falling back to
/// `Transient` for connection-shaped errors and `Fatal` otherwise.
#[must_use]
pub fn classify_failure(status: Option<u16>, message: &str) -> Error {
    match status {
        Some(401) | Some(403) => return Error::SessionInvalid(message.to_string()),
        Some(429) => return Error::QuotaExhausted(message.to_string()),
        Some(s) if s >= 500 => return Error::Transient(message.to_string()),
        _ => {}
    }

    if is_quota_message(message) {
        return Error::QuotaExhausted(message.to_string());
    }

    let lower = message.to_lowercase();
    if lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("dns")
        || lower.contains("broken pipe")
    {
        return Error::Transient(message.to_string());
    }

    Error::Fatal(message.to_string())
}
