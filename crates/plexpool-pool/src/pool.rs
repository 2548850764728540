//! The client pool: ordered wrappers, round-robin cursor, persistence.
//!
//! One mutex guards the ordered client list, the cursor, and the
//! monitor/fallback config. The lock is only ever held for O(1)
//! bookkeeping — selection, counter updates, snapshot construction.
//! Network I/O runs against `Arc<dyn Session>` handles cloned out under
//! the lock, and file writes happen on snapshots after the lock is
//! released.

use crate::client::{ClientState, ClientStatus, ClientWrapper};
use crate::config::{
    load_config, save_config, FallbackConfig, MonitorConfig, PoolConfig, TokenEntry,
};
use crate::error::{Error, Result};
use crate::state_file::{load_state, save_state, ClientRecord, PoolStateFile};
use chrono::{DateTime, Utc};
use plexpool_upstream::{
    Error as UpstreamError, HttpSession, RateLimits, SearchMode, Session, SessionCredentials,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Builds a session from credentials. Injected so tests can substitute
/// mock sessions for the HTTP implementation.
pub type SessionFactory =
    Arc<dyn Fn(&SessionCredentials) -> plexpool_upstream::Result<Arc<dyn Session>> + Send + Sync>;

struct PoolInner {
    /// Insertion order defines the round-robin sequence
    clients: Vec<ClientWrapper>,
    cursor: usize,
    monitor: MonitorConfig,
    fallback: FallbackConfig,
    /// Unknown top-level config fields, preserved on save
    extra: serde_json::Map<String, serde_json::Value>,
}

impl PoolInner {
    fn position(&self, id: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.id() == id)
    }

    fn to_config(&self) -> PoolConfig {
        PoolConfig {
            monitor: self.monitor.clone(),
            fallback: self.fallback.clone(),
            tokens: self
                .clients
                .iter()
                .map(|c| {
                    let creds = c.credentials();
                    TokenEntry {
                        id: c.id().to_string(),
                        csrf_token: creds.csrf_token.clone(),
                        session_token: creds.session_token.clone(),
                        enabled: c.enabled,
                        extra: c.extra.clone(),
                    }
                })
                .collect(),
            extra: self.extra.clone(),
        }
    }

    fn to_state_file(&self) -> PoolStateFile {
        let mut state = PoolStateFile::default();
        for c in &self.clients {
            state.clients.insert(
                c.id().to_string(),
                ClientRecord {
                    enabled: c.enabled,
                    session_valid: Some(c.session_valid),
                    rate_limits: c.rate_limits.clone(),
                    last_check_at: c.last_check_at.map(|t| t.to_rfc3339()),
                    request_count: c.request_count,
                    fail_count: c.fail_count,
                    backoff_until: c.backoff_until,
                    consecutive_failures: c.consecutive_failures,
                    state: c.state().as_str().to_string(),
                },
            );
        }
        state
    }
}

/// The pool of client wrappers plus the selection cursor.
pub struct ClientPool {
    inner: Mutex<PoolInner>,
    config_path: PathBuf,
    state_path: PathBuf,
    factory: SessionFactory,
    /// Bumped whenever monitor/fallback config changes so the monitor
    /// task restarts its tick with fresh parameters.
    config_rev: watch::Sender<u64>,
}

impl ClientPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(
        config_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        factory: SessionFactory,
    ) -> Self {
        let (config_rev, _) = watch::channel(0);
        Self {
            inner: Mutex::new(PoolInner {
                clients: Vec::new(),
                cursor: 0,
                monitor: MonitorConfig::default(),
                fallback: FallbackConfig::default(),
                extra: serde_json::Map::new(),
            }),
            config_path: config_path.into(),
            state_path: state_path.into(),
            factory,
            config_rev,
        }
    }

    /// Load a pool from the master config, then overlay the cross-process
    /// state file. Tokens whose session cannot be constructed are skipped
    /// with a warning rather than failing the whole pool.
    pub async fn load(
        config_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        factory: SessionFactory,
    ) -> Self {
        let pool = Self::new(config_path, state_path, factory);
        let config = load_config(&pool.config_path);
        {
            let mut inner = pool.inner.lock().await;
            inner.monitor = config.monitor;
            inner.fallback = config.fallback;
            inner.extra = config.extra;
            for token in config.tokens {
                let creds = SessionCredentials::new(&token.csrf_token, &token.session_token);
                match (pool.factory)(&creds) {
                    Ok(session) => {
                        let mut wrapper = ClientWrapper::new(&token.id, creds, session);
                        wrapper.enabled = token.enabled;
                        wrapper.extra = token.extra;
                        inner.clients.push(wrapper);
                    }
                    Err(e) => {
                        warn!(id = %token.id, error = %e, "skipping token: session construction failed");
                    }
                }
            }
            info!(clients = inner.clients.len(), "pool loaded");
        }
        pool.refresh_from_state().await;
        pool
    }

    /// Pool backed by real HTTP sessions with environment-derived config.
    pub async fn load_http(
        config_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        let factory: SessionFactory =
            Arc::new(|creds| Ok(Arc::new(HttpSession::from_env(creds)?) as Arc<dyn Session>));
        Self::load(config_path, state_path, factory).await
    }

    /// Path of the master config file.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Path of the cross-process state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Build a one-shot session with empty credentials (anonymous
    /// fallback). Not tracked by any wrapper.
    pub fn anonymous_session(&self) -> plexpool_upstream::Result<Arc<dyn Session>> {
        (self.factory)(&SessionCredentials::anonymous())
    }

    /// Number of clients.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    /// Whether the pool has no clients.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Round-robin selection: starting at the cursor, return the first
    /// wrapper that is enabled, out of backoff, and has quota for `mode`,
    /// advancing the cursor past it. `None` when no wrapper qualifies.
    pub async fn acquire(&self, mode: SearchMode) -> Option<(String, Arc<dyn Session>)> {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().await;
        let n = inner.clients.len();
        if n == 0 {
            return None;
        }
        for i in 0..n {
            let idx = (inner.cursor + i) % n;
            let c = &inner.clients[idx];
            if c.is_available(now) && c.has_quota(mode) {
                let id = c.id().to_string();
                let session = c.session();
                inner.cursor = (idx + 1) % n;
                debug!(client = %id, %mode, "acquired client");
                return Some((id, session));
            }
        }
        None
    }

    /// Earliest `backoff_until` still in the future, if any client is in
    /// backoff. Included in total-exhaustion errors so a caller can decide
    /// whether to wait or add tokens.
    pub async fn earliest_backoff(&self) -> Option<i64> {
        let now = Utc::now().timestamp();
        let inner = self.inner.lock().await;
        inner
            .clients
            .iter()
            .map(|c| c.backoff_until)
            .filter(|&b| b > now)
            .min()
    }

    // ========================================================================
    // Outcome recording
    // ========================================================================

    /// Record a successful query on `id`, optimistically decrementing the
    /// local quota view for pro-class modes, and persist the state file.
    pub async fn record_success(&self, id: &str, mode: SearchMode) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(idx) = inner.position(id) else {
                return;
            };
            let c = &mut inner.clients[idx];
            c.record_success();
            if mode.is_pro_class() {
                c.decrement_quota(mode);
            }
            inner.to_state_file()
        };
        self.persist_state(snapshot);
    }

    /// Record a classified failure on `id` and persist the state file.
    pub async fn record_failure(&self, id: &str, error: &UpstreamError, mode: SearchMode) {
        let now = Utc::now().timestamp();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(idx) = inner.position(id) else {
                return;
            };
            inner.clients[idx].record_failure(error, mode, now);
            inner.to_state_file()
        };
        self.persist_state(snapshot);
    }

    /// Apply an authoritative quota snapshot from a health check. Returns
    /// `false` when the client no longer exists (removed while the fetch
    /// was in flight — the result is discarded).
    pub async fn apply_rate_limits(&self, id: &str, limits: RateLimits) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(idx) = inner.position(id) else {
                return false;
            };
            inner.clients[idx].apply_rate_limits(limits);
            inner.to_state_file()
        };
        self.persist_state(snapshot);
        true
    }

    /// Mark a session invalid after a classified auth failure. Returns
    /// `false` when the client no longer exists.
    pub async fn mark_session_invalid(&self, id: &str) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(idx) = inner.position(id) else {
                return false;
            };
            inner.clients[idx].mark_invalid();
            inner.to_state_file()
        };
        self.persist_state(snapshot);
        true
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Add a token. Fails on a duplicate id. The caller should follow up
    /// with an immediate single-client health check so the new wrapper's
    /// validity and quota are known without waiting for the monitor.
    pub async fn add_token(&self, token: TokenEntry) -> Result<()> {
        let (config, state) = {
            let mut inner = self.inner.lock().await;
            if inner.position(&token.id).is_some() {
                return Err(Error::DuplicateClient(token.id));
            }
            let creds = SessionCredentials::new(&token.csrf_token, &token.session_token);
            let session = (self.factory)(&creds)?;
            let mut wrapper = ClientWrapper::new(&token.id, creds, session);
            wrapper.enabled = token.enabled;
            wrapper.extra = token.extra;
            inner.clients.push(wrapper);
            (inner.to_config(), inner.to_state_file())
        };
        info!(clients = config.tokens.len(), "token added");
        save_config(&self.config_path, &config)?;
        save_state(&self.state_path, &state)?;
        Ok(())
    }

    /// Remove a token by id.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (config, state) = {
            let mut inner = self.inner.lock().await;
            let idx = inner.position(id).ok_or_else(|| Error::UnknownClient(id.to_string()))?;
            inner.clients.remove(idx);
            if idx < inner.cursor {
                inner.cursor -= 1;
            }
            let len = inner.clients.len();
            inner.cursor = if len == 0 { 0 } else { inner.cursor % len };
            (inner.to_config(), inner.to_state_file())
        };
        save_config(&self.config_path, &config)?;
        save_state(&self.state_path, &state)?;
        Ok(())
    }

    /// Enable or disable a client. Quota and counters are untouched.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let (config, state) = {
            let mut inner = self.inner.lock().await;
            let idx = inner.position(id).ok_or_else(|| Error::UnknownClient(id.to_string()))?;
            inner.clients[idx].enabled = enabled;
            (inner.to_config(), inner.to_state_file())
        };
        save_config(&self.config_path, &config)?;
        save_state(&self.state_path, &state)?;
        Ok(())
    }

    /// Clear a client's backoff and rebuild its session. Idempotent.
    pub async fn reset(&self, id: &str) -> Result<()> {
        let state = {
            let mut inner = self.inner.lock().await;
            let idx = inner.position(id).ok_or_else(|| Error::UnknownClient(id.to_string()))?;
            let session = (self.factory)(inner.clients[idx].credentials())?;
            let c = &mut inner.clients[idx];
            c.clear_backoff();
            c.replace_session(session);
            inner.to_state_file()
        };
        save_state(&self.state_path, &state)?;
        Ok(())
    }

    /// Export all tokens in round-robin order.
    pub async fn export(&self) -> Vec<TokenEntry> {
        self.inner.lock().await.to_config().tokens
    }

    /// Import tokens, skipping ids that already exist. Returns
    /// `(added, skipped)`.
    pub async fn import(&self, tokens: Vec<TokenEntry>) -> Result<(usize, usize)> {
        let mut added = 0;
        let mut skipped = 0;
        let (config, state) = {
            let mut inner = self.inner.lock().await;
            for token in tokens {
                if inner.position(&token.id).is_some() {
                    skipped += 1;
                    continue;
                }
                let creds = SessionCredentials::new(&token.csrf_token, &token.session_token);
                match (self.factory)(&creds) {
                    Ok(session) => {
                        let mut wrapper = ClientWrapper::new(&token.id, creds, session);
                        wrapper.enabled = token.enabled;
                        wrapper.extra = token.extra;
                        inner.clients.push(wrapper);
                        added += 1;
                    }
                    Err(e) => {
                        warn!(id = %token.id, error = %e, "import: session construction failed");
                        skipped += 1;
                    }
                }
            }
            (inner.to_config(), inner.to_state_file())
        };
        save_config(&self.config_path, &config)?;
        save_state(&self.state_path, &state)?;
        Ok((added, skipped))
    }

    // ========================================================================
    // Config
    // ========================================================================

    /// Current monitor configuration.
    pub async fn monitor_config(&self) -> MonitorConfig {
        self.inner.lock().await.monitor.clone()
    }

    /// Replace the monitor configuration and wake the monitor task.
    pub async fn set_monitor_config(&self, monitor: MonitorConfig) -> Result<()> {
        let config = {
            let mut inner = self.inner.lock().await;
            inner.monitor = monitor;
            inner.to_config()
        };
        save_config(&self.config_path, &config)?;
        self.config_rev.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Current fallback configuration.
    pub async fn fallback_config(&self) -> FallbackConfig {
        self.inner.lock().await.fallback.clone()
    }

    /// Replace the fallback configuration.
    pub async fn set_fallback_config(&self, fallback: FallbackConfig) -> Result<()> {
        let config = {
            let mut inner = self.inner.lock().await;
            inner.fallback = fallback;
            inner.to_config()
        };
        save_config(&self.config_path, &config)?;
        Ok(())
    }

    /// Subscribe to config-revision bumps (monitor reconfiguration).
    #[must_use]
    pub fn subscribe_config(&self) -> watch::Receiver<u64> {
        self.config_rev.subscribe()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Status snapshot of every client, in round-robin order.
    pub async fn statuses(&self) -> Vec<ClientStatus> {
        let now = Utc::now().timestamp();
        let inner = self.inner.lock().await;
        inner.clients.iter().map(|c| c.status(now)).collect()
    }

    /// Status of a single client.
    pub async fn status_of(&self, id: &str) -> Result<ClientStatus> {
        let now = Utc::now().timestamp();
        let inner = self.inner.lock().await;
        inner
            .clients
            .iter()
            .find(|c| c.id() == id)
            .map(|c| c.status(now))
            .ok_or_else(|| Error::UnknownClient(id.to_string()))
    }

    /// Derived state of a single client, if it exists.
    pub async fn state_of(&self, id: &str) -> Option<ClientState> {
        let inner = self.inner.lock().await;
        inner.clients.iter().find(|c| c.id() == id).map(ClientWrapper::state)
    }

    /// Session handles for a health-check cycle: every enabled client, or
    /// the single named client regardless of its enable flag.
    pub async fn check_targets(
        &self,
        only: Option<&str>,
    ) -> Vec<(String, Arc<dyn Session>, ClientState)> {
        let inner = self.inner.lock().await;
        inner
            .clients
            .iter()
            .filter(|c| match only {
                Some(id) => c.id() == id,
                None => c.enabled,
            })
            .map(|c| (c.id().to_string(), c.session(), c.state()))
            .collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the current runtime state to the cross-process state file.
    pub async fn save_state_now(&self) -> Result<()> {
        let snapshot = self.inner.lock().await.to_state_file();
        save_state(&self.state_path, &snapshot)
    }

    /// Write the current configuration to the master config file.
    pub async fn save_config_now(&self) -> Result<()> {
        let snapshot = self.inner.lock().await.to_config();
        save_config(&self.config_path, &snapshot)
    }

    /// Merge the on-disk state file into the in-memory pool (called at the
    /// top of every query so sibling-process updates become visible).
    ///
    /// Merge rules: membership and `enabled` are config-owned and never
    /// imported; health fields are adopted when the file's snapshot is
    /// newer; counters and backoff only ever move forward.
    pub async fn refresh_from_state(&self) {
        let file = load_state(&self.state_path);
        if file.clients.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        for c in inner.clients.iter_mut() {
            let Some(record) = file.clients.get(c.id()) else {
                continue;
            };

            let file_checked_at = record
                .last_check_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let file_is_newer = match (file_checked_at, c.last_check_at) {
                (Some(f), Some(l)) => f > l,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if file_is_newer {
                c.session_valid = record.resolved_session_valid();
                c.rate_limits = record.rate_limits.clone();
                c.last_check_at = file_checked_at;
            }

            c.request_count = c.request_count.max(record.request_count);
            c.fail_count = c.fail_count.max(record.fail_count);
            if record.backoff_until > c.backoff_until {
                c.backoff_until = record.backoff_until;
                c.consecutive_failures = record.consecutive_failures;
            }
        }
    }

    fn persist_state(&self, snapshot: PoolStateFile) {
        if let Err(e) = save_state(&self.state_path, &snapshot) {
            warn!(error = %e, "state file write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexpool_upstream::{MockSession, ModeLimit};
    use std::collections::{HashMap, HashSet};

    fn mock_factory() -> SessionFactory {
        Arc::new(|creds| {
            let label = if creds.is_anonymous() {
                "anon".to_string()
            } else {
                creds.csrf_token.clone()
            };
            Ok(Arc::new(MockSession::new(label)) as Arc<dyn Session>)
        })
    }

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (
            dir.path().join("token_pool_config.json"),
            dir.path().join("pool_state.json"),
        )
    }

    async fn pool_with(dir: &tempfile::TempDir, ids: &[&str]) -> ClientPool {
        let (config_path, state_path) = paths(dir);
        let pool = ClientPool::new(config_path, state_path, mock_factory());
        for id in ids {
            pool.add_token(TokenEntry::new(*id, format!("csrf-{id}"), format!("sess-{id}")))
                .await
                .unwrap();
        }
        pool
    }

    fn limits(pro: Option<u32>, research: Option<u32>) -> RateLimits {
        let mut modes = HashMap::new();
        modes.insert(
            "research".to_string(),
            ModeLimit {
                available: true,
                remaining: research,
                kind: None,
            },
        );
        RateLimits {
            pro_remaining: pro,
            modes,
            fetched_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a"]).await;
        let err = pool
            .add_token(TokenEntry::new("a", "c", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateClient(_)));

        // Removing and re-adding the same id is allowed.
        pool.remove("a").await.unwrap();
        pool.add_token(TokenEntry::new("a", "c", "s")).await.unwrap();
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_fair_rotation_visits_all_clients() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b", "c"]).await;

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let (id, _) = pool.acquire(SearchMode::Auto).await.unwrap();
            seen.insert(id);
        }
        assert_eq!(seen.len(), 3);

        // The fourth pick wraps back to an already-seen client.
        let (first_again, _) = pool.acquire(SearchMode::Auto).await.unwrap();
        assert!(seen.contains(&first_again));
    }

    #[tokio::test]
    async fn test_acquire_respects_quota() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;
        pool.apply_rate_limits("a", limits(Some(0), Some(1))).await;

        // Pro skips the exhausted client every time.
        for _ in 0..4 {
            let (id, _) = pool.acquire(SearchMode::Pro).await.unwrap();
            assert_eq!(id, "b");
        }
        // Auto still reaches it.
        let mut seen = HashSet::new();
        for _ in 0..2 {
            let (id, _) = pool.acquire(SearchMode::Auto).await.unwrap();
            seen.insert(id);
        }
        assert!(seen.contains("a"));
    }

    #[tokio::test]
    async fn test_acquire_respects_backoff_and_disable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;

        pool.record_failure("a", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;
        let (id, _) = pool.acquire(SearchMode::Auto).await.unwrap();
        assert_eq!(id, "b");

        pool.set_enabled("b", false).await.unwrap();
        assert!(pool.acquire(SearchMode::Auto).await.is_none());

        // Reset clears the backoff and makes `a` selectable again.
        pool.reset("a").await.unwrap();
        let (id, _) = pool.acquire(SearchMode::Auto).await.unwrap();
        assert_eq!(id, "a");
    }

    #[tokio::test]
    async fn test_invalid_sessions_are_never_selected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a"]).await;
        pool.mark_session_invalid("a").await;
        assert!(pool.acquire(SearchMode::Auto).await.is_none());
        assert_eq!(pool.state_of("a").await, Some(ClientState::Offline));
    }

    #[tokio::test]
    async fn test_success_decrements_pro_counter_locally() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a"]).await;
        pool.apply_rate_limits("a", limits(Some(1), Some(5))).await;

        pool.record_success("a", SearchMode::Pro).await;
        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.pro_remaining, Some(0));
        assert_eq!(status.request_count, 1);

        // Now exhausted for pro, still fine for auto.
        assert!(pool.acquire(SearchMode::Pro).await.is_none());
        assert!(pool.acquire(SearchMode::Auto).await.is_some());
    }

    #[tokio::test]
    async fn test_disable_enable_preserves_counters_and_quota() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a"]).await;
        pool.apply_rate_limits("a", limits(Some(7), Some(2))).await;
        pool.record_success("a", SearchMode::Auto).await;

        pool.set_enabled("a", false).await.unwrap();
        pool.set_enabled("a", true).await.unwrap();

        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.pro_remaining, Some(7));
        assert_eq!(status.request_count, 1);
        assert_eq!(status.fail_count, 0);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a"]).await;
        pool.record_failure("a", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;
        pool.reset("a").await.unwrap();
        pool.reset("a").await.unwrap();
        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.backoff_until, 0);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_remove_adjusts_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b", "c"]).await;

        // Advance the cursor past `a`.
        let (first, _) = pool.acquire(SearchMode::Auto).await.unwrap();
        assert_eq!(first, "a");
        pool.remove("a").await.unwrap();

        // Rotation continues over the remaining clients without a panic.
        let mut seen = HashSet::new();
        for _ in 0..2 {
            let (id, _) = pool.acquire(SearchMode::Auto).await.unwrap();
            seen.insert(id);
        }
        assert_eq!(seen, HashSet::from(["b".to_string(), "c".to_string()]));
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;
        let exported = pool.export().await;
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].id, "a");

        let dir2 = tempfile::tempdir().unwrap();
        let (config_path, state_path) = paths(&dir2);
        let other = ClientPool::new(config_path, state_path, mock_factory());
        let (added, skipped) = other.import(exported.clone()).await.unwrap();
        assert_eq!((added, skipped), (2, 0));

        // Importing again skips everything.
        let (added, skipped) = other.import(exported).await.unwrap();
        assert_eq!((added, skipped), (0, 2));
    }

    #[tokio::test]
    async fn test_config_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (config_path, state_path) = paths(&dir);
        {
            let pool = ClientPool::new(&config_path, &state_path, mock_factory());
            pool.add_token(TokenEntry::new("a", "c1", "s1")).await.unwrap();
            pool.add_token(TokenEntry::new("b", "c2", "s2")).await.unwrap();
            pool.set_enabled("b", false).await.unwrap();
            pool.set_monitor_config(MonitorConfig {
                enable: false,
                interval_hours: 0.5,
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let reloaded = ClientPool::load(&config_path, &state_path, mock_factory()).await;
        assert_eq!(reloaded.len().await, 2);
        let statuses = reloaded.statuses().await;
        assert_eq!(statuses[0].id, "a");
        assert!(statuses[0].enabled);
        assert!(!statuses[1].enabled);
        let monitor = reloaded.monitor_config().await;
        assert!(!monitor.enable);
        assert!((monitor.interval_hours - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_state_file_sharing_between_pools() {
        let dir = tempfile::tempdir().unwrap();
        let (config_path, state_path) = paths(&dir);

        let admin = ClientPool::new(&config_path, &state_path, mock_factory());
        admin.add_token(TokenEntry::new("a", "c", "s")).await.unwrap();
        admin.apply_rate_limits("a", limits(Some(9), Some(3))).await;

        // A sibling pool over the same files sees the health data after a
        // refresh.
        let sibling = ClientPool::load(&config_path, &state_path, mock_factory()).await;
        let status = sibling.status_of("a").await.unwrap();
        assert_eq!(status.pro_remaining, Some(9));
        assert_eq!(status.session_valid, Some(true));

        // Later admin-side updates arrive on the next refresh.
        admin.apply_rate_limits("a", limits(Some(2), Some(3))).await;
        sibling.refresh_from_state().await;
        let status = sibling.status_of("a").await.unwrap();
        assert_eq!(status.pro_remaining, Some(2));
    }

    #[tokio::test]
    async fn test_refresh_never_resurrects_removed_clients() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;
        pool.apply_rate_limits("b", limits(Some(1), None)).await;
        pool.remove("b").await.unwrap();

        // A stale record for `b` in the state file must not bring it back.
        pool.refresh_from_state().await;
        assert_eq!(pool.len().await, 1);
        assert!(pool.status_of("b").await.is_err());
    }

    #[tokio::test]
    async fn test_earliest_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;
        assert!(pool.earliest_backoff().await.is_none());

        pool.record_failure("a", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;
        pool.record_failure("b", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;
        pool.record_failure("b", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;

        let earliest = pool.earliest_backoff().await.unwrap();
        let a_status = pool.status_of("a").await.unwrap();
        assert_eq!(earliest, a_status.backoff_until);
    }

    #[tokio::test]
    async fn test_check_targets_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(&dir, &["a", "b"]).await;
        pool.set_enabled("b", false).await.unwrap();

        let all = pool.check_targets(None).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "a");

        // A named target is checked even when disabled.
        let named = pool.check_targets(Some("b")).await;
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].0, "b");
    }
}
