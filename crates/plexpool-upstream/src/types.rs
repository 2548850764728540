//! Request, response, and quota types for the upstream engine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Search modes and sources
// ============================================================================

/// Answer mode requested from the upstream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchMode {
    /// Free-tier answer, never quota-limited
    #[serde(rename = "auto")]
    Auto,
    /// Pro search (shares the pro counter with reasoning)
    #[serde(rename = "pro")]
    Pro,
    /// Reasoning-model answer (shares the pro counter with pro)
    #[serde(rename = "reasoning")]
    Reasoning,
    /// Multi-step deep research (separate "research" counter)
    #[serde(rename = "deep research")]
    DeepResearch,
}

impl SearchMode {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pro => "pro",
            Self::Reasoning => "reasoning",
            Self::DeepResearch => "deep research",
        }
    }

    /// Parse a caller-supplied mode string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pro" => Ok(Self::Pro),
            "reasoning" => Ok(Self::Reasoning),
            "deep research" | "deep_research" => Ok(Self::DeepResearch),
            other => Err(Error::Validation(format!("unknown mode: '{other}'"))),
        }
    }

    /// Whether this mode draws from a tracked quota counter.
    #[must_use]
    pub fn is_pro_class(&self) -> bool {
        !matches!(self, Self::Auto)
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result source selected for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Web,
    Scholar,
    Social,
}

impl SearchSource {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Scholar => "scholar",
            Self::Social => "social",
        }
    }

    /// Parse a caller-supplied source string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "scholar" => Ok(Self::Scholar),
            "social" => Ok(Self::Social),
            other => Err(Error::Validation(format!("unknown source: '{other}'"))),
        }
    }
}

// ============================================================================
// Search request
// ============================================================================

/// One search dispatched to a session.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query text
    pub query: String,
    /// Answer mode
    pub mode: SearchMode,
    /// Model override (pro/reasoning only; ignored for auto)
    pub model: Option<String>,
    /// Result sources; defaults to `[web]`
    pub sources: Vec<SearchSource>,
    /// Attached files: name → content
    pub files: HashMap<String, String>,
    /// Answer language (BCP-47 tag)
    pub language: String,
    /// Skip thread history on the upstream account
    pub incognito: bool,
}

impl SearchRequest {
    /// Create a request with defaults: auto mode, web source, en-US.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Auto,
            model: None,
            sources: vec![SearchSource::Web],
            files: HashMap::new(),
            language: "en-US".to_string(),
            incognito: false,
        }
    }

    /// Set the answer mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the model override.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replace the result sources.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<SearchSource>) -> Self {
        self.sources = sources;
        self
    }
}

// ============================================================================
// Search response
// ============================================================================

/// The answer body: a plain text answer, or the step list produced by
/// deep research. The shape is what the downgrade check inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerBody {
    /// Plain answer text (auto/pro/reasoning shape)
    Text(String),
    /// Deep-research step objects
    Steps(Vec<serde_json::Value>),
}

impl AnswerBody {
    /// Whether this is the multi-step deep-research shape.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Steps(_))
    }

    /// Flatten the answer to display text.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Steps(steps) => steps
                .iter()
                .filter_map(|s| {
                    s.get("content")
                        .and_then(|c| c.get("answer"))
                        .and_then(|a| a.as_str())
                        .map(str::to_string)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Completed search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Answer body, absent when the stream carried no final message
    pub answer: Option<AnswerBody>,
    /// Follow-up suggestions from the engine
    #[serde(default)]
    pub related_queries: Vec<String>,
    /// Mode the upstream reports it actually answered in, when present
    #[serde(default)]
    pub mode: Option<String>,
    /// Raw final payload for callers that need fields we do not model
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl SearchResponse {
    /// Whether the response carries no usable answer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.answer {
            None => true,
            Some(AnswerBody::Text(t)) => t.trim().is_empty(),
            Some(AnswerBody::Steps(s)) => s.is_empty(),
        }
    }

    /// Whether the answer has the deep-research step shape.
    #[must_use]
    pub fn has_research_steps(&self) -> bool {
        self.answer.as_ref().is_some_and(AnswerBody::is_structured)
    }
}

// ============================================================================
// Rate limits
// ============================================================================

/// Per-mode quota entry as reported by the upstream rate-limit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeLimit {
    /// Whether the mode is available on this account at all
    pub available: bool,
    /// Remaining uses in the current window; `None` = unknown
    pub remaining: Option<u32>,
    /// Limit kind label (e.g. "daily"), when reported
    pub kind: Option<String>,
}

/// Snapshot of a session's quota counters at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    /// Remaining pro searches (shared by pro and reasoning); `None` = unknown
    pub pro_remaining: Option<u32>,
    /// Per-mode entries keyed by upstream mode name ("research", …)
    #[serde(default)]
    pub modes: HashMap<String, ModeLimit>,
    /// When this snapshot was fetched (epoch seconds)
    pub fetched_at: i64,
}

impl RateLimits {
    /// Remaining counter for the upstream "research" mode (deep research).
    #[must_use]
    pub fn research_remaining(&self) -> Option<u32> {
        self.modes.get("research").and_then(|m| m.remaining)
    }

    /// Zero the counter that backs the given mode (local pessimism after a
    /// quota-classified failure).
    pub fn zero_for(&mut self, mode: SearchMode) {
        match mode {
            SearchMode::Pro | SearchMode::Reasoning => self.pro_remaining = Some(0),
            SearchMode::DeepResearch => {
                self.modes
                    .entry("research".to_string())
                    .and_modify(|m| m.remaining = Some(0))
                    .or_insert(ModeLimit {
                        available: true,
                        remaining: Some(0),
                        kind: None,
                    });
            }
            SearchMode::Auto => {}
        }
    }

    /// Decrement the counter that backs the given mode by one (local
    /// optimism after a successful query; the next monitor tick replaces
    /// this with the authoritative value).
    pub fn decrement_for(&mut self, mode: SearchMode) {
        match mode {
            SearchMode::Pro | SearchMode::Reasoning => {
                if let Some(n) = self.pro_remaining.as_mut() {
                    *n = n.saturating_sub(1);
                }
            }
            SearchMode::DeepResearch => {
                if let Some(m) = self.modes.get_mut("research") {
                    if let Some(n) = m.remaining.as_mut() {
                        *n = n.saturating_sub(1);
                    }
                }
            }
            SearchMode::Auto => {}
        }
    }
}
