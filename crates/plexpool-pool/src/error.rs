//! Error types for plexpool-pool.

use thiserror::Error;

/// Pool error type
#[derive(Debug, Error)]
pub enum Error {
    /// Error surfaced unchanged from a session
    #[error(transparent)]
    Upstream(#[from] plexpool_upstream::Error),

    /// No client was eligible for the requested mode
    #[error("no clients available{}", format_backoff(.earliest_backoff))]
    AllUnavailable {
        /// Epoch seconds when the earliest client backoff clears
        earliest_backoff: Option<i64>,
    },

    /// Every eligible client (and any fallback) was tried and failed
    #[error("all clients failed: {last}{}", format_backoff(.earliest_backoff))]
    Exhausted {
        /// The last classified failure
        #[source]
        last: plexpool_upstream::Error,
        /// Epoch seconds when the earliest client backoff clears
        earliest_backoff: Option<i64>,
    },

    /// Config or state file could not be written
    #[error("persistence error: {0}")]
    Persistence(String),

    /// No client with this id in the pool
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A client with this id is already in the pool
    #[error("duplicate client id: {0}")]
    DuplicateClient(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

fn format_backoff(earliest: &Option<i64>) -> String {
    match earliest {
        Some(ts) => {
            let wait = (*ts - chrono::Utc::now().timestamp()).max(0);
            format!("; earliest backoff clears in {wait}s")
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_unavailable_mentions_backoff() {
        let err = Error::AllUnavailable {
            earliest_backoff: Some(chrono::Utc::now().timestamp() + 120),
        };
        let msg = err.to_string();
        assert!(msg.contains("no clients available"));
        assert!(msg.contains("backoff clears in"));

        let err = Error::AllUnavailable {
            earliest_backoff: None,
        };
        assert!(!err.to_string().contains("backoff"));
    }

    #[test]
    fn test_exhausted_carries_last_error() {
        let err = Error::Exhausted {
            last: plexpool_upstream::Error::EmptyResponse,
            earliest_backoff: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("all clients failed"));
        assert!(msg.contains("connection dropped"));
    }
}
