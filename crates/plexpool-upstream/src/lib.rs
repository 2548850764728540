//! Upstream answer-engine abstraction for plexpool.
//!
//! This crate wraps a single authenticated browser session against the
//! upstream engine behind the [`Session`] trait: a `search` call that runs
//! one query to completion and a `fetch_rate_limits` call that reads quota
//! counters without consuming any. The HTTP implementation lives in
//! [`http`]; [`mock`] provides a scriptable session for tests.

pub mod error;
pub mod http;
pub mod mock;
pub mod session;
pub mod types;

pub use error::{classify_failure, is_quota_message, Error, Result};
pub use http::{HttpSession, UpstreamConfig};
pub use mock::MockSession;
pub use session::{Session, SessionCredentials};
pub use types::{
    AnswerBody, ModeLimit, RateLimits, SearchMode, SearchRequest, SearchResponse, SearchSource,
};
