//! Scriptable mock session for pool and engine tests.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{AnswerBody, RateLimits, SearchMode, SearchRequest, SearchResponse};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A mock session that replays a scripted queue of outcomes.
///
/// Each `search` call pops the next scripted outcome; an empty script
/// yields a canned text answer. Calls are recorded for assertions.
pub struct MockSession {
    id: String,
    script: Mutex<VecDeque<Result<SearchResponse>>>,
    limits: Mutex<VecDeque<Result<RateLimits>>>,
    calls: Mutex<Vec<(String, SearchMode)>>,
    limit_fetches: Mutex<u32>,
}

impl MockSession {
    /// Create a mock session with an empty script.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            limits: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            limit_fetches: Mutex::new(0),
        }
    }

    /// Queue a successful text answer.
    pub fn push_answer(&self, text: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(Self::text_response(text)));
    }

    /// Queue a successful deep-research (structured) answer.
    pub fn push_research_answer(&self) {
        self.script.lock().unwrap().push_back(Ok(SearchResponse {
            answer: Some(AnswerBody::Steps(vec![serde_json::json!({
                "step_type": "FINAL",
                "content": {"answer": "research complete"}
            })])),
            related_queries: vec![],
            mode: Some("deep research".to_string()),
            raw: serde_json::Value::Null,
        }));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Queue an empty (dropped-connection shaped) response.
    pub fn push_empty(&self) {
        self.script.lock().unwrap().push_back(Ok(SearchResponse {
            answer: None,
            related_queries: vec![],
            mode: None,
            raw: serde_json::Value::Null,
        }));
    }

    /// Queue a rate-limit fetch outcome.
    pub fn push_rate_limits(&self, limits: RateLimits) {
        self.limits.lock().unwrap().push_back(Ok(limits));
    }

    /// Queue a rate-limit fetch failure.
    pub fn push_rate_limits_error(&self, error: Error) {
        self.limits.lock().unwrap().push_back(Err(error));
    }

    /// Number of `search` calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of `fetch_rate_limits` calls made.
    #[must_use]
    pub fn limit_fetch_count(&self) -> u32 {
        *self.limit_fetches.lock().unwrap()
    }

    /// Modes of recorded `search` calls, in order.
    #[must_use]
    pub fn recorded_modes(&self) -> Vec<SearchMode> {
        self.calls.lock().unwrap().iter().map(|(_, m)| *m).collect()
    }

    fn text_response(text: impl Into<String>) -> SearchResponse {
        SearchResponse {
            answer: Some(AnswerBody::Text(text.into())),
            related_queries: vec![],
            mode: Some("auto".to_string()),
            raw: serde_json::Value::Null,
        }
    }
}

#[async_trait::async_trait]
impl Session for MockSession {
    fn identity(&self) -> String {
        format!("mock:{}", self.id)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((request.query.clone(), request.mode));
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(Self::text_response(format!("answer from {}", self.id))),
        }
    }

    async fn fetch_rate_limits(&self) -> Result<RateLimits> {
        *self.limit_fetches.lock().unwrap() += 1;
        match self.limits.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(RateLimits {
                pro_remaining: Some(100),
                modes: Default::default(),
                fetched_at: chrono::Utc::now().timestamp(),
            }),
        }
    }
}
