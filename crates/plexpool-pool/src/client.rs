//! Per-session mutable state: quota view, counters, and backoff.

use chrono::{DateTime, Utc};
use plexpool_upstream::{Error as UpstreamError, RateLimits, SearchMode, Session, SessionCredentials};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// First backoff step after a failure.
pub const BACKOFF_BASE_SECS: u64 = 60;
/// Backoff ceiling.
pub const BACKOFF_CAP_SECS: u64 = 3600;

/// Backoff duration for the n-th consecutive failure (n ≥ 1):
/// 60 s doubling per failure, capped at one hour.
#[must_use]
pub fn backoff_duration_secs(consecutive_failures: u32) -> u64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let exp = consecutive_failures.saturating_sub(1).min(6);
    (BACKOFF_BASE_SECS << exp).min(BACKOFF_CAP_SECS)
}

/// Display label derived from a wrapper's health fields. Never stored;
/// recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Normal,
    Exhausted,
    Offline,
    Unknown,
}

impl ClientState {
    /// Returns the string label used in the state file.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Exhausted => "exhausted",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable snapshot of one client for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub id: String,
    pub identity: String,
    pub enabled: bool,
    pub state: ClientState,
    pub session_valid: Option<bool>,
    pub pro_remaining: Option<u32>,
    pub research_remaining: Option<u32>,
    pub request_count: u64,
    pub fail_count: u64,
    pub consecutive_failures: u32,
    /// Epoch seconds; 0 when not in backoff
    pub backoff_until: i64,
    /// Seconds of backoff left, 0 when available
    pub backoff_remaining: i64,
    pub last_check_at: Option<DateTime<Utc>>,
}

/// One pool member: immutable credentials, a live session handle, and the
/// mutable health/quota/backoff state the scheduler reads.
pub struct ClientWrapper {
    id: String,
    credentials: SessionCredentials,
    session: Arc<dyn Session>,
    /// Unknown token-entry fields, carried so config round-trips keep them
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
    pub(crate) enabled: bool,
    /// `None` until the first health check
    pub(crate) session_valid: Option<bool>,
    pub(crate) rate_limits: Option<RateLimits>,
    pub(crate) last_check_at: Option<DateTime<Utc>>,
    pub(crate) request_count: u64,
    pub(crate) fail_count: u64,
    /// Epoch seconds; the wrapper is in backoff while `now < backoff_until`
    pub(crate) backoff_until: i64,
    pub(crate) consecutive_failures: u32,
}

impl ClientWrapper {
    /// Create a wrapper around a freshly built session.
    #[must_use]
    pub fn new(id: impl Into<String>, credentials: SessionCredentials, session: Arc<dyn Session>) -> Self {
        Self {
            id: id.into(),
            credentials,
            session,
            extra: serde_json::Map::new(),
            enabled: true,
            session_valid: None,
            rate_limits: None,
            last_check_at: None,
            request_count: 0,
            fail_count: 0,
            backoff_until: 0,
            consecutive_failures: 0,
        }
    }

    /// Stable opaque id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Credentials this wrapper was built from.
    #[must_use]
    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    /// Live session handle.
    #[must_use]
    pub fn session(&self) -> Arc<dyn Session> {
        Arc::clone(&self.session)
    }

    /// Replace the session handle (explicit reset only).
    pub fn replace_session(&mut self, session: Arc<dyn Session>) {
        self.session = session;
    }

    /// Whether this wrapper still has quota for the given mode.
    ///
    /// Unknown counters count as available; the monitor supplies the
    /// authoritative values.
    #[must_use]
    pub fn has_quota(&self, mode: SearchMode) -> bool {
        if self.session_valid == Some(false) {
            return false;
        }
        match mode {
            SearchMode::Auto => true,
            SearchMode::Pro | SearchMode::Reasoning => match &self.rate_limits {
                Some(rl) => rl.pro_remaining.map_or(true, |n| n > 0),
                None => true,
            },
            SearchMode::DeepResearch => match &self.rate_limits {
                Some(rl) => rl.research_remaining().map_or(true, |n| n > 0),
                None => true,
            },
        }
    }

    /// Whether this wrapper may be selected right now.
    #[must_use]
    pub fn is_available(&self, now: i64) -> bool {
        self.enabled && now >= self.backoff_until
    }

    /// Record a successful query: counters up, backoff cleared.
    pub fn record_success(&mut self) {
        self.request_count += 1;
        self.consecutive_failures = 0;
        self.backoff_until = 0;
    }

    /// Record a classified failure at time `now`.
    ///
    /// All kinds climb the same backoff ladder; quota-shaped failures also
    /// zero the local counter for the failing mode, and auth failures mark
    /// the session invalid.
    pub fn record_failure(&mut self, error: &UpstreamError, mode: SearchMode, now: i64) {
        self.fail_count += 1;
        self.consecutive_failures += 1;
        self.backoff_until = now + backoff_duration_secs(self.consecutive_failures) as i64;

        match error {
            UpstreamError::SessionInvalid(_) => {
                self.session_valid = Some(false);
            }
            UpstreamError::QuotaExhausted(_) => {
                self.zero_quota(mode);
            }
            UpstreamError::SilentDowngrade => {
                // The account answered deep research with a plain pro
                // answer: its research budget is gone.
                self.zero_quota(SearchMode::DeepResearch);
            }
            _ => {}
        }
    }

    fn zero_quota(&mut self, mode: SearchMode) {
        match self.rate_limits.as_mut() {
            Some(rl) => rl.zero_for(mode),
            None => {
                let mut rl = RateLimits {
                    pro_remaining: None,
                    modes: Default::default(),
                    fetched_at: chrono::Utc::now().timestamp(),
                };
                rl.zero_for(mode);
                self.rate_limits = Some(rl);
            }
        }
    }

    /// Optimistically decrement the local quota view after a success; the
    /// next monitor tick replaces it with the authoritative value.
    pub fn decrement_quota(&mut self, mode: SearchMode) {
        if let Some(rl) = self.rate_limits.as_mut() {
            rl.decrement_for(mode);
        }
    }

    /// Apply an authoritative quota snapshot from a health check.
    pub fn apply_rate_limits(&mut self, limits: RateLimits) {
        self.rate_limits = Some(limits);
        self.session_valid = Some(true);
        self.last_check_at = Some(Utc::now());
    }

    /// Mark the session invalid (auth failure observed by the monitor).
    pub fn mark_invalid(&mut self) {
        self.session_valid = Some(false);
        self.last_check_at = Some(Utc::now());
    }

    /// Clear backoff state. Idempotent.
    pub fn clear_backoff(&mut self) {
        self.backoff_until = 0;
        self.consecutive_failures = 0;
    }

    /// Derived display state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        match self.session_valid {
            Some(false) => ClientState::Offline,
            None => ClientState::Unknown,
            Some(true) => {
                let exhausted = self
                    .rate_limits
                    .as_ref()
                    .and_then(|rl| rl.pro_remaining)
                    .is_some_and(|n| n == 0);
                if exhausted {
                    ClientState::Exhausted
                } else {
                    ClientState::Normal
                }
            }
        }
    }

    /// Snapshot for status displays.
    #[must_use]
    pub fn status(&self, now: i64) -> ClientStatus {
        ClientStatus {
            id: self.id.clone(),
            identity: self.session.identity(),
            enabled: self.enabled,
            state: self.state(),
            session_valid: self.session_valid,
            pro_remaining: self.rate_limits.as_ref().and_then(|rl| rl.pro_remaining),
            research_remaining: self
                .rate_limits
                .as_ref()
                .and_then(RateLimits::research_remaining),
            request_count: self.request_count,
            fail_count: self.fail_count,
            consecutive_failures: self.consecutive_failures,
            backoff_until: self.backoff_until,
            backoff_remaining: (self.backoff_until - now).max(0),
            last_check_at: self.last_check_at,
        }
    }
}
