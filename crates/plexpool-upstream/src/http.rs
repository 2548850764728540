//! HTTP implementation of [`Session`] against the upstream answer engine.
//!
//! One `HttpSession` owns one reqwest client (its own connection pool) and
//! one copied cookie map. The answer endpoint streams server-sent events;
//! `search` accumulates them and returns only once the terminal event
//! arrives. The rate-limit endpoint is a plain GET that consumes no quota.

use crate::error::{classify_failure, Error, Result};
use crate::session::{mask_token, Session, SessionCredentials};
use crate::types::{AnswerBody, ModeLimit, RateLimits, SearchMode, SearchRequest, SearchResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Upstream site root.
pub const UPSTREAM_BASE: &str = "https://www.perplexity.ai";

/// Default request deadline; deep research can legitimately run minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Browser profile presented to the upstream edge.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const CSRF_COOKIE: &str = "next-auth.csrf-token";
const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

/// Upstream connection configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Site root
    pub base_url: String,
    /// Per-request deadline
    pub timeout: Duration,
    /// Optional SOCKS proxy URL
    pub socks_proxy: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: UPSTREAM_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            socks_proxy: None,
        }
    }
}

impl UpstreamConfig {
    /// Create configuration from environment variables
    /// (`PERPLEXITY_TIMEOUT` seconds, `SOCKS_PROXY` URL).
    #[must_use]
    pub fn from_env() -> Self {
        let timeout = std::env::var("PERPLEXITY_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let socks_proxy = std::env::var("SOCKS_PROXY").ok().filter(|s| !s.is_empty());

        Self {
            base_url: UPSTREAM_BASE.to_string(),
            timeout,
            socks_proxy,
        }
    }

    /// Set the request deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the site root (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Rate-limit endpoint payload.
#[derive(Debug, Deserialize)]
struct RateLimitWire {
    #[serde(default)]
    remaining: Option<u32>,
    #[serde(default)]
    modes: HashMap<String, ModeLimitWire>,
}

#[derive(Debug, Deserialize)]
struct ModeLimitWire {
    #[serde(default)]
    available: bool,
    #[serde(default)]
    remaining: Option<u32>,
    #[serde(default)]
    kind: Option<String>,
}

/// Reqwest-backed upstream session.
pub struct HttpSession {
    client: reqwest::Client,
    config: UpstreamConfig,
    /// Owned copy of the caller's cookie map, fixed at construction.
    cookies: HashMap<String, String>,
    identity: String,
    /// Last quota snapshot seen, for the pre-dispatch zero-quota check.
    last_limits: RwLock<Option<RateLimits>>,
    timeout_secs: u64,
}

impl HttpSession {
    /// Create a session from credentials.
    ///
    /// The cookie values are copied into an owned map; the caller keeps no
    /// handle into the session's state.
    pub fn new(credentials: &SessionCredentials, config: UpstreamConfig) -> Result<Self> {
        let mut cookies = HashMap::new();
        if !credentials.csrf_token.is_empty() {
            cookies.insert(CSRF_COOKIE.to_string(), credentials.csrf_token.clone());
        }
        if !credentials.session_token.is_empty() {
            cookies.insert(SESSION_COOKIE.to_string(), credentials.session_token.clone());
        }
        let identity = if credentials.is_anonymous() {
            "anonymous".to_string()
        } else {
            mask_token(&credentials.session_token)
        };

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout);

        if let Some(proxy_url) = &config.socks_proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Fatal(format!("invalid SOCKS_PROXY: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Fatal(format!("failed to create HTTP client: {e}")))?;

        let timeout_secs = config.timeout.as_secs();
        Ok(Self {
            client,
            config,
            cookies,
            identity,
            last_limits: RwLock::new(None),
            timeout_secs,
        })
    }

    /// Session with environment-derived configuration.
    pub fn from_env(credentials: &SessionCredentials) -> Result<Self> {
        Self::new(credentials, UpstreamConfig::from_env())
    }

    fn cookie_header(&self) -> String {
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.sort();
        pairs.join("; ")
    }

    fn map_send_error(&self, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout_secs)
        } else {
            Error::Transient(e.to_string())
        }
    }

    /// Reject a pro-class request when the last snapshot shows the backing
    /// counter at zero. The post-hoc quota updates in the pool still apply.
    async fn precheck_quota(&self, mode: SearchMode) -> Result<()> {
        if !mode.is_pro_class() {
            return Ok(());
        }
        let limits = self.last_limits.read().await;
        let Some(rl) = limits.as_ref() else {
            return Ok(());
        };
        let remaining = match mode {
            SearchMode::DeepResearch => rl.research_remaining(),
            _ => rl.pro_remaining,
        };
        if remaining == Some(0) {
            return Err(Error::Validation("No remaining pro queries.".to_string()));
        }
        Ok(())
    }

    fn build_search_body(request: &SearchRequest) -> serde_json::Value {
        serde_json::json!({
            "query_str": request.query,
            "params": {
                "mode": request.mode.as_str(),
                "model_preference": request.model,
                "sources": request.sources.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                "attachments": request.files,
                "language": request.language,
                "incognito": request.incognito,
                "version": "2.18",
            }
        })
    }

    /// Accumulate the SSE stream until the terminal event.
    ///
    /// Events arrive as `data: {json}` lines; the final message either
    /// carries `"final": true` or is followed by an `event: end_of_stream`
    /// line. A stream that ends any other way is a dropped connection.
    async fn read_sse(&self, response: reqwest::Response) -> Result<SearchResponse> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut last_payload: Option<serde_json::Value> = None;
        let mut finished = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_send_error(&e))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);

                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(data) {
                        Ok(payload) => {
                            let is_final = payload
                                .get("final")
                                .and_then(serde_json::Value::as_bool)
                                .unwrap_or(false);
                            last_payload = Some(payload);
                            if is_final {
                                finished = true;
                                break 'outer;
                            }
                        }
                        Err(e) => debug!(error = %e, "skipping unparseable SSE event"),
                    }
                } else if line.starts_with("event:") && line.contains("end_of_stream") {
                    finished = true;
                    break 'outer;
                }
            }
        }

        if !finished {
            return Err(Error::EmptyResponse);
        }
        let payload = last_payload.ok_or(Error::EmptyResponse)?;
        let response = Self::parse_final_payload(payload);
        if response.is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(response)
    }

    fn parse_final_payload(payload: serde_json::Value) -> SearchResponse {
        // `text` is a plain answer string for auto/pro/reasoning and a
        // JSON-encoded step list for deep research.
        let answer = match payload.get("text") {
            Some(serde_json::Value::String(text)) => {
                match serde_json::from_str::<Vec<serde_json::Value>>(text) {
                    Ok(steps) => Some(AnswerBody::Steps(steps)),
                    Err(_) => Some(AnswerBody::Text(text.clone())),
                }
            }
            Some(serde_json::Value::Array(steps)) => Some(AnswerBody::Steps(steps.clone())),
            _ => None,
        };

        let related_queries = payload
            .get("related_queries")
            .and_then(serde_json::Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mode = payload
            .get("mode")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        SearchResponse {
            answer,
            related_queries,
            mode,
            raw: payload,
        }
    }
}

#[async_trait::async_trait]
impl Session for HttpSession {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    #[instrument(skip(self, request), fields(session = %self.identity, mode = %request.mode))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        self.precheck_quota(request.mode).await?;

        debug!("dispatching search to upstream");
        let response = self
            .client
            .post(format!("{}/rest/sse/perplexity_ask", self.config.base_url))
            .header("Cookie", self.cookie_header())
            .header("Accept", "text/event-stream")
            .json(&Self::build_search_body(request))
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(Some(status.as_u16()), &body));
        }

        self.read_sse(response).await
    }

    #[instrument(skip(self), fields(session = %self.identity))]
    async fn fetch_rate_limits(&self) -> Result<RateLimits> {
        let response = self
            .client
            .get(format!("{}/rest/rate-limit", self.config.base_url))
            .header("Cookie", self.cookie_header())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(Some(status.as_u16()), &body));
        }

        let wire: RateLimitWire = response
            .json()
            .await
            .map_err(|e| Error::Fatal(format!("malformed rate-limit payload: {e}")))?;

        let limits = RateLimits {
            pro_remaining: wire.remaining,
            modes: wire
                .modes
                .into_iter()
                .map(|(name, m)| {
                    (
                        name,
                        ModeLimit {
                            available: m.available,
                            remaining: m.remaining,
                            kind: m.kind,
                        },
                    )
                })
                .collect(),
            fetched_at: chrono::Utc::now().timestamp(),
        };

        if limits.pro_remaining.is_none() {
            warn!(session = %self.identity, "rate-limit endpoint reported no counter");
        }
        *self.last_limits.write().await = Some(limits.clone());
        Ok(limits)
    }
}
