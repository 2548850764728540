//! The query execution path: validation, rotation, fallback.
//!
//! `run_query` repeatedly asks the pool for a candidate, runs the search
//! against the session handle outside the pool lock, and records the
//! classified outcome. A pro-class request that exhausts every client
//! falls back to auto mode over the same pool, then to an anonymous
//! one-shot session.

use crate::error::{Error, Result};
use crate::pool::ClientPool;
use plexpool_upstream::{
    Error as UpstreamError, SearchMode, SearchRequest, SearchResponse, SearchSource,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Models accepted for pro-mode requests.
pub const PRO_MODELS: &[&str] = &["sonar", "gpt-5", "claude-4.5-sonnet", "gemini-2.5-pro", "grok-4"];
/// Models accepted for reasoning-mode requests.
pub const REASONING_MODELS: &[&str] = &["o3", "r1", "claude-4.5-sonnet-thinking"];

/// Caller-facing query, with the string-typed fields front-ends supply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Defaults to "auto"
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Defaults to `["web"]`
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// Defaults to no attachments
    #[serde(default)]
    pub files: Option<HashMap<String, String>>,
    /// Defaults to "en-US"
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub incognito: bool,
}

impl QueryRequest {
    /// Plain query with defaults.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Validate and normalize into a typed [`SearchRequest`].
    pub fn validate(&self) -> Result<SearchRequest> {
        if self.query.trim().is_empty() {
            return Err(UpstreamError::Validation("query must not be empty".to_string()).into());
        }
        let mode = match self.mode.as_deref() {
            None | Some("") => SearchMode::Auto,
            Some(s) => SearchMode::parse(s)?,
        };
        let sources = match &self.sources {
            None => vec![SearchSource::Web],
            Some(list) if list.is_empty() => vec![SearchSource::Web],
            Some(list) => list
                .iter()
                .map(|s| SearchSource::parse(s))
                .collect::<plexpool_upstream::Result<Vec<_>>>()?,
        };
        if let Some(model) = self.model.as_deref() {
            validate_model(mode, model)?;
        }
        Ok(SearchRequest {
            query: self.query.clone(),
            mode,
            model: self.model.clone(),
            sources,
            files: self.files.clone().unwrap_or_default(),
            language: self
                .language
                .clone()
                .unwrap_or_else(|| "en-US".to_string()),
            incognito: self.incognito,
        })
    }
}

/// Reject a model that the requested mode cannot serve.
pub fn validate_model(mode: SearchMode, model: &str) -> Result<()> {
    let allowed: &[&str] = match mode {
        SearchMode::Pro => PRO_MODELS,
        SearchMode::Reasoning => REASONING_MODELS,
        // Auto picks its own model; deep research has a fixed pipeline.
        SearchMode::Auto | SearchMode::DeepResearch => &[],
    };
    if allowed.contains(&model) {
        Ok(())
    } else {
        Err(UpstreamError::Validation(format!(
            "Invalid model '{model}' for mode '{mode}'"
        ))
        .into())
    }
}

/// Run one query against the pool with the three-level fallback chain.
///
/// 1. Rotate over clients eligible for the requested mode.
/// 2. If that exhausts and `fallback_to_auto` is on, rotate again in auto
///    mode (clients with spent pro quota become eligible again).
/// 3. Finally try an anonymous one-shot session in auto mode.
#[instrument(skip(pool, request), fields(mode = ?request.mode))]
pub async fn run_query(pool: &ClientPool, request: QueryRequest) -> Result<SearchResponse> {
    let search = request.validate()?;

    // Pick up pool mutations made by the sibling process.
    pool.refresh_from_state().await;

    let mut last_error: Option<UpstreamError> = None;
    let mut any_candidate = false;

    match run_mode_loop(pool, &search, &mut last_error).await {
        LoopOutcome::Success(response) => return Ok(response),
        LoopOutcome::Validation(error) => return Err(error.into()),
        LoopOutcome::NoCandidates => {}
        LoopOutcome::AllFailed => any_candidate = true,
    }

    let fallback = pool.fallback_config().await;
    if search.mode.is_pro_class() && fallback.fallback_to_auto {
        info!("primary loop exhausted; retrying in auto mode");
        let auto_search = SearchRequest {
            mode: SearchMode::Auto,
            model: None,
            ..search.clone()
        };
        match run_mode_loop(pool, &auto_search, &mut last_error).await {
            LoopOutcome::Success(response) => return Ok(response),
            LoopOutcome::Validation(error) => return Err(error.into()),
            LoopOutcome::NoCandidates => {}
            LoopOutcome::AllFailed => any_candidate = true,
        }
    }

    if fallback.fallback_to_auto {
        match anonymous_attempt(pool, &search).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                warn!(error = %e, "anonymous fallback failed");
                last_error = Some(e);
                any_candidate = true;
            }
        }
    }

    let earliest_backoff = pool.earliest_backoff().await;
    match last_error {
        Some(last) if any_candidate => Err(Error::Exhausted {
            last,
            earliest_backoff,
        }),
        _ => Err(Error::AllUnavailable { earliest_backoff }),
    }
}

enum LoopOutcome {
    Success(SearchResponse),
    /// A validation rejection — surfaced unchanged, no client consumed
    Validation(UpstreamError),
    /// `acquire` returned nothing before any candidate was tried
    NoCandidates,
    /// At least one candidate was tried; all failed
    AllFailed,
}

/// One rotation pass: visit every distinct eligible client at most once.
///
/// `acquire` may hand back a duplicate when the cursor wraps (another
/// caller can advance it concurrently), so termination is driven by the
/// seen-set, with `2 × |pool|` iterations as a hard bound.
async fn run_mode_loop(
    pool: &ClientPool,
    search: &SearchRequest,
    last_error: &mut Option<UpstreamError>,
) -> LoopOutcome {
    let pool_size = pool.len().await;
    let mut seen: HashSet<String> = HashSet::new();

    for _ in 0..pool_size.saturating_mul(2) {
        let Some((id, session)) = pool.acquire(search.mode).await else {
            break;
        };
        if seen.contains(&id) {
            if seen.len() >= pool_size {
                break;
            }
            // Cursor wrap; other eligible clients may remain.
            continue;
        }
        seen.insert(id.clone());

        debug!(client = %id, mode = %search.mode, "dispatching query");
        match session.search(search).await {
            Ok(response) if response.is_empty() => {
                // A dropped connection surfaces as data, not a crash.
                let error = UpstreamError::EmptyResponse;
                pool.record_failure(&id, &error, search.mode).await;
                *last_error = Some(error);
            }
            Ok(response)
                if search.mode == SearchMode::DeepResearch && !response.has_research_steps() =>
            {
                // The account silently served a cheaper answer shape.
                let error = UpstreamError::SilentDowngrade;
                warn!(client = %id, "deep research answer came back pro-shaped");
                pool.record_failure(&id, &error, search.mode).await;
                *last_error = Some(error);
            }
            Ok(response) => {
                pool.record_success(&id, search.mode).await;
                return LoopOutcome::Success(response);
            }
            Err(error @ UpstreamError::Validation(_)) => {
                // Bad input never consumes a client; surface unchanged.
                return LoopOutcome::Validation(error);
            }
            Err(error) => {
                warn!(client = %id, %error, "query failed");
                pool.record_failure(&id, &error, search.mode).await;
                *last_error = Some(error);
            }
        }
    }

    if seen.is_empty() {
        LoopOutcome::NoCandidates
    } else {
        LoopOutcome::AllFailed
    }
}

/// Last-resort attempt with a one-shot anonymous session. Its outcome is
/// not recorded against any client.
async fn anonymous_attempt(
    pool: &ClientPool,
    search: &SearchRequest,
) -> plexpool_upstream::Result<SearchResponse> {
    info!("attempting anonymous one-shot session");
    let session = pool.anonymous_session()?;
    let anonymous_search = SearchRequest {
        mode: SearchMode::Auto,
        model: None,
        ..search.clone()
    };
    let response = session.search(&anonymous_search).await?;
    if response.is_empty() {
        return Err(UpstreamError::EmptyResponse);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackConfig, TokenEntry};
    use crate::pool::SessionFactory;
    use plexpool_upstream::{MockSession, ModeLimit, RateLimits};
    use std::sync::Arc;

    // Factory that reuses pre-built mocks by csrf token so tests can
    // script individual clients before the pool dispatches to them.
    fn scripted_factory(mocks: Vec<(&str, Arc<MockSession>)>) -> SessionFactory {
        let mocks: HashMap<String, Arc<MockSession>> = mocks
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Arc::new(move |creds| {
            if creds.is_anonymous() {
                return Ok(Arc::new(MockSession::new("anon")) as Arc<dyn plexpool_upstream::Session>);
            }
            mocks
                .get(&creds.csrf_token)
                .map(|m| Arc::clone(m) as Arc<dyn plexpool_upstream::Session>)
                .ok_or_else(|| UpstreamError::Fatal("unknown mock".to_string()))
        })
    }

    async fn build_pool(
        dir: &tempfile::TempDir,
        mocks: Vec<(&str, Arc<MockSession>)>,
    ) -> ClientPool {
        let ids: Vec<String> = mocks.iter().map(|(k, _)| k.to_string()).collect();
        let pool = ClientPool::new(
            dir.path().join("config.json"),
            dir.path().join("state.json"),
            scripted_factory(mocks),
        );
        for id in ids {
            pool.add_token(TokenEntry::new(&id, &id, format!("sess-{id}")))
                .await
                .unwrap();
        }
        pool
    }

    fn limits(pro: Option<u32>) -> RateLimits {
        let mut modes = HashMap::new();
        modes.insert(
            "research".to_string(),
            ModeLimit {
                available: true,
                remaining: Some(5),
                kind: None,
            },
        );
        RateLimits {
            pro_remaining: pro,
            modes,
            fetched_at: chrono::Utc::now().timestamp(),
        }
    }

    fn pro_query(q: &str) -> QueryRequest {
        QueryRequest {
            query: q.to_string(),
            mode: Some("pro".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_rejects_bad_inputs() {
        assert!(QueryRequest::new("").validate().is_err());
        assert!(QueryRequest::new("   ").validate().is_err());

        let mut req = QueryRequest::new("q");
        req.mode = Some("hyper".to_string());
        assert!(req.validate().is_err());

        let mut req = QueryRequest::new("q");
        req.sources = Some(vec!["web".to_string(), "darkweb".to_string()]);
        assert!(req.validate().is_err());

        let mut req = pro_query("q");
        req.model = Some("pro-turbo".to_string());
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid model 'pro-turbo' for mode 'pro'"));
    }

    #[test]
    fn test_validation_normalizes_defaults() {
        let search = QueryRequest::new("q").validate().unwrap();
        assert_eq!(search.mode, SearchMode::Auto);
        assert_eq!(search.sources, vec![SearchSource::Web]);
        assert!(search.files.is_empty());
        assert_eq!(search.language, "en-US");

        let mut req = QueryRequest::new("q");
        req.sources = Some(vec![]);
        let search = req.validate().unwrap();
        assert_eq!(search.sources, vec![SearchSource::Web]);
    }

    #[test]
    fn test_validate_model_per_mode() {
        assert!(validate_model(SearchMode::Pro, "sonar").is_ok());
        assert!(validate_model(SearchMode::Reasoning, "o3").is_ok());
        assert!(validate_model(SearchMode::Pro, "o3").is_err());
        assert!(validate_model(SearchMode::Auto, "sonar").is_err());
    }

    #[tokio::test]
    async fn test_basic_rotation_spreads_queries() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let b = Arc::new(MockSession::new("b"));
        let c = Arc::new(MockSession::new("c"));
        let pool = build_pool(
            &dir,
            vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())],
        )
        .await;

        for _ in 0..3 {
            run_query(&pool, pro_query("q")).await.unwrap();
        }
        // Each client answered exactly once.
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 1);

        // The fourth query lands on the same client as the first.
        run_query(&pool, pro_query("q")).await.unwrap();
        assert_eq!(a.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_client_is_skipped_within_one_query() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let b = Arc::new(MockSession::new("b"));
        a.push_error(UpstreamError::Transient("boom".to_string()));
        let pool = build_pool(&dir, vec![("a", a.clone()), ("b", b.clone())]).await;

        let response = run_query(&pool, pro_query("q")).await.unwrap();
        assert!(!response.is_empty());
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);

        // The failure put `a` into backoff.
        let status = pool.status_of("a").await.unwrap();
        assert!(status.backoff_remaining > 0);
    }

    #[tokio::test]
    async fn test_exhausted_client_recovered_through_auto_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let b = Arc::new(MockSession::new("b"));
        let c = Arc::new(MockSession::new("c"));
        // b and c fail their pro attempts with quota errors; a answers in
        // the auto retry.
        b.push_error(UpstreamError::QuotaExhausted("No remaining pro queries".into()));
        c.push_error(UpstreamError::QuotaExhausted("Pro search quota exhausted".into()));
        let pool = build_pool(
            &dir,
            vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())],
        )
        .await;
        pool.apply_rate_limits("a", limits(Some(0))).await;

        let response = run_query(&pool, pro_query("q")).await.unwrap();
        assert!(!response.is_empty());

        // a was skipped in the pro pass and reached only in auto mode.
        assert_eq!(a.call_count(), 1);
        assert_eq!(a.recorded_modes(), vec![SearchMode::Auto]);
        assert_eq!(b.recorded_modes(), vec![SearchMode::Pro]);
    }

    #[tokio::test]
    async fn test_anonymous_fallback_after_all_clients_fail() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        // Fails in pro and again in the auto retry.
        a.push_error(UpstreamError::QuotaExhausted("rate limit".into()));
        a.push_error(UpstreamError::Transient("x".into()));
        let pool = build_pool(&dir, vec![("a", a.clone())]).await;

        let response = run_query(&pool, pro_query("q")).await.unwrap();
        assert!(!response.is_empty());
        // The anonymous one-shot is not accounted to the client.
        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.request_count, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_surfaces_structured_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        a.push_empty();
        let pool = build_pool(&dir, vec![("a", a.clone())]).await;
        pool.set_fallback_config(FallbackConfig {
            fallback_to_auto: false,
            ..Default::default()
        })
        .await
        .unwrap();

        let err = run_query(&pool, pro_query("q")).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("connection dropped"), "got: {msg}");

        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.fail_count, 1);
    }

    #[tokio::test]
    async fn test_deep_research_downgrade_detection() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let b = Arc::new(MockSession::new("b"));
        // a answers deep research with a plain text body; b does it right.
        a.push_answer("just a pro answer");
        b.push_research_answer();
        let pool = build_pool(&dir, vec![("a", a.clone()), ("b", b.clone())]).await;

        let mut req = QueryRequest::new("deep dive");
        req.mode = Some("deep research".to_string());
        let response = run_query(&pool, req).await.unwrap();
        assert!(response.has_research_steps());

        // The downgrade zeroed a's research budget and counted a failure.
        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.research_remaining, Some(0));
        assert_eq!(status.fail_count, 1);
    }

    #[tokio::test]
    async fn test_downgrade_everywhere_surfaces_downgrade_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        // Pro-shaped answer for a deep-research request.
        a.push_answer("plain");
        let pool = build_pool(&dir, vec![("a", a.clone())]).await;
        pool.set_fallback_config(FallbackConfig {
            fallback_to_auto: false,
            ..Default::default()
        })
        .await
        .unwrap();

        let mut req = QueryRequest::new("deep dive");
        req.mode = Some("deep research".to_string());
        let err = run_query(&pool, req).await.unwrap_err();
        assert!(err.to_string().contains("downgraded"), "got: {err}");
    }

    #[tokio::test]
    async fn test_all_unavailable_reports_earliest_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let pool = build_pool(&dir, vec![("a", a.clone())]).await;
        pool.set_fallback_config(FallbackConfig {
            fallback_to_auto: false,
            ..Default::default()
        })
        .await
        .unwrap();
        pool.record_failure("a", &UpstreamError::Transient("x".into()), SearchMode::Auto)
            .await;

        let err = run_query(&pool, QueryRequest::new("q")).await.unwrap_err();
        assert!(matches!(err, Error::AllUnavailable { earliest_backoff: Some(_) }));
        assert!(err.to_string().contains("backoff clears in"));
        assert_eq!(a.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_error_consumes_no_client() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let pool = build_pool(&dir, vec![("a", a.clone())]).await;

        let mut req = QueryRequest::new("q");
        req.mode = Some("warp".to_string());
        let err = run_query(&pool, req).await.unwrap_err();
        assert!(err.to_string().contains("unknown mode"));
        assert_eq!(a.call_count(), 0);
        assert_eq!(pool.status_of("a").await.unwrap().fail_count, 0);
    }

    #[tokio::test]
    async fn test_session_invalid_marks_client_offline() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(MockSession::new("a"));
        let b = Arc::new(MockSession::new("b"));
        a.push_error(UpstreamError::SessionInvalid("401".into()));
        let pool = build_pool(&dir, vec![("a", a.clone()), ("b", b.clone())]).await;

        run_query(&pool, pro_query("q")).await.unwrap();
        let status = pool.status_of("a").await.unwrap();
        assert_eq!(status.session_valid, Some(false));

        // Subsequent queries never touch the invalid client.
        run_query(&pool, pro_query("q")).await.unwrap();
        assert_eq!(a.call_count(), 1);
    }
}
