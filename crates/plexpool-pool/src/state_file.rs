//! Cross-process runtime state snapshot.
//!
//! The admin server and the stdio front-end each hold their own pool
//! instance; this file is the shared blackboard between them. Mutations
//! are write-through, reads happen at the top of every query. Writes are
//! atomic; readers tolerate an absent or malformed file and fall back to
//! their in-memory copy. Consistency is best-effort eventual.

use crate::config::atomic_write_json;
use crate::error::Result;
use plexpool_upstream::RateLimits;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Runtime record for one client, as written to the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub enabled: bool,
    /// Tri-state validity. Serialized as `true`/`false`/`null`; when the
    /// field is absent entirely, readers derive it from `state`.
    #[serde(default, deserialize_with = "some_if_present")]
    pub session_valid: Option<Option<bool>>,
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
    /// ISO-8601 timestamp of the last health check
    #[serde(default)]
    pub last_check_at: Option<String>,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub fail_count: u64,
    #[serde(default)]
    pub backoff_until: i64,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Computed display state, present for compatibility with readers
    /// that predate `session_valid`. Kept as a raw label: a writer may
    /// emit values we do not model (older files use "downgrade"), and a
    /// strange label must not poison the rest of the file.
    #[serde(default)]
    pub state: String,
}

// Distinguishes an explicit `null` (Some(None)) from an absent field
// (None) so legacy files without `session_valid` derive it from `state`.
fn some_if_present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<bool>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<bool>::deserialize(deserializer).map(Some)
}

impl ClientRecord {
    /// Effective session validity: the explicit field when present,
    /// otherwise derived from the compatibility `state` label.
    /// "offline" maps to false, "unknown" to null; any other label
    /// ("normal", "downgrade", "exhausted", future values) means valid.
    #[must_use]
    pub fn resolved_session_valid(&self) -> Option<bool> {
        match self.session_valid {
            Some(v) => v,
            None => match self.state.as_str() {
                "offline" => Some(false),
                "unknown" => None,
                _ => Some(true),
            },
        }
    }
}

/// The whole state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStateFile {
    #[serde(default)]
    pub clients: HashMap<String, ClientRecord>,
}

/// Load the state file. Absent → empty; malformed → logged and empty (the
/// caller keeps its in-memory view).
#[must_use]
pub fn load_state(path: &Path) -> PoolStateFile {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PoolStateFile::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read state file");
            return PoolStateFile::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed state file; ignoring");
            PoolStateFile::default()
        }
    }
}

/// Save the state file atomically.
pub fn save_state(path: &Path, state: &PoolStateFile) -> Result<()> {
    atomic_write_json(path, state)
}
