//! Master configuration file: tokens, monitor, and fallback settings.
//!
//! The file is plain JSON, written atomically (sibling temp file +
//! rename). Loaders tolerate an absent file (empty pool) and a malformed
//! file (logged, empty pool). Unknown fields ride along on round-trips
//! via flattened maps.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Default master config path.
pub const DEFAULT_CONFIG_PATH: &str = "token_pool_config.json";
/// Default cross-process state file path.
pub const DEFAULT_STATE_PATH: &str = "pool_state.json";

/// Floor for the monitor interval.
pub const MIN_INTERVAL_HOURS: f64 = 0.1;

fn default_true() -> bool {
    true
}

fn default_interval() -> f64 {
    3.0
}

/// One provisioned token (cookie bundle) in round-robin order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub id: String,
    pub csrf_token: String,
    pub session_token: String,
    /// Operator toggle; kept in the config so restarts honour it
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenEntry {
    /// Create an entry with default flags.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        csrf_token: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            csrf_token: csrf_token.into(),
            session_token: session_token.into(),
            enabled: true,
            extra: serde_json::Map::new(),
        }
    }
}

/// Background health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Check interval in hours, clamped to at least 0.1
    #[serde(rename = "interval", default = "default_interval")]
    pub interval_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tg_bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tg_chat_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval_hours: default_interval(),
            tg_bot_token: None,
            tg_chat_id: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl MonitorConfig {
    /// Effective tick interval with the floor applied.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_hours.max(MIN_INTERVAL_HOURS) * 3600.0)
    }

    /// Whether both Telegram fields are set.
    #[must_use]
    pub fn telegram_configured(&self) -> bool {
        self.tg_bot_token.as_deref().is_some_and(|s| !s.is_empty())
            && self.tg_chat_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Fallback-chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub fallback_to_auto: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            fallback_to_auto: true,
            extra: serde_json::Map::new(),
        }
    }
}

/// The master configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Ordering defines the round-robin sequence
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Load the master config. Absent file → default (empty pool); malformed
/// file → logged and default.
#[must_use]
pub fn load_config(path: &Path) -> PoolConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PoolConfig::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config; starting empty");
            return PoolConfig::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed config; starting empty");
            PoolConfig::default()
        }
    }
}

/// Save the master config atomically.
pub fn save_config(path: &Path, config: &PoolConfig) -> Result<()> {
    atomic_write_json(path, config)
}

/// Write `value` as pretty JSON to a sibling temp file, then rename into
/// place. The temp file is unlinked on failure; readers only ever observe
/// the pre-image or the post-image.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Persistence(format!("serialize {}: {e}", path.display())))?;

    let tmp = temp_sibling(path);
    if let Err(e) = std::fs::write(&tmp, &bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Persistence(format!(
            "write {}: {e}",
            tmp.display()
        )));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Persistence(format!(
            "rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        )));
    }
    Ok(())
}

// Concurrent tasks save off-lock, so every write needs its own temp file:
// a shared name would let one writer rename a sibling's half-written file
// into place.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string());
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{file_name}.tmp.{}.{seq}",
        std::process::id()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert!(config.monitor.enable);
        assert!(config.fallback.fallback_to_auto);
        assert!(config.tokens.is_empty());
    }

    #[test]
    fn test_interval_floor() {
        let monitor = MonitorConfig {
            interval_hours: 0.0001,
            ..Default::default()
        };
        assert_eq!(monitor.interval(), Duration::from_secs(360));

        let monitor = MonitorConfig {
            interval_hours: 2.0,
            ..Default::default()
        };
        assert_eq!(monitor.interval(), Duration::from_secs(7200));
    }

    #[test]
    fn test_telegram_configured() {
        let mut monitor = MonitorConfig::default();
        assert!(!monitor.telegram_configured());
        monitor.tg_bot_token = Some("123:abc".to_string());
        assert!(!monitor.telegram_configured());
        monitor.tg_chat_id = Some("42".to_string());
        assert!(monitor.telegram_configured());
    }

    #[test]
    fn test_round_trip_preserves_order_and_unknown_fields() {
        let raw = serde_json::json!({
            "monitor": {"enable": false, "interval": 0.5, "future_knob": 7},
            "fallback": {"fallback_to_auto": false},
            "tokens": [
                {"id": "b", "csrf_token": "c1", "session_token": "s1", "note": "work"},
                {"id": "a", "csrf_token": "c2", "session_token": "s2"}
            ],
            "schema_version": 2
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&raw).unwrap()).unwrap();

        let config = load_config(&path);
        assert!(!config.monitor.enable);
        assert!(!config.fallback.fallback_to_auto);
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.tokens[0].id, "b");
        assert_eq!(config.tokens[1].id, "a");

        save_config(&path, &config).unwrap();
        let reloaded: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded["schema_version"], 2);
        assert_eq!(reloaded["tokens"][0]["id"], "b");
        assert_eq!(reloaded["tokens"][0]["note"], "work");
        assert_eq!(reloaded["monitor"]["future_knob"], 7);
    }

    #[test]
    fn test_load_tolerates_absent_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let absent = load_config(&dir.path().join("missing.json"));
        assert!(absent.tokens.is_empty());

        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let broken = load_config(&path);
        assert!(broken.tokens.is_empty());
    }

    #[test]
    fn test_temp_names_are_unique_per_write() {
        let path = Path::new("pool_state.json");
        assert_ne!(temp_sibling(path), temp_sibling(path));
    }

    #[test]
    fn test_concurrent_writers_never_tear_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config(&path, &PoolConfig::default()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for round in 0..25 {
                        let mut config = PoolConfig::default();
                        config.tokens.push(TokenEntry::new(
                            format!("writer-{i}-round-{round}"),
                            "csrf",
                            "sess",
                        ));
                        atomic_write_json(&path, &config).unwrap();

                        // Readers racing the writers must always see a
                        // complete image, never a torn one.
                        let raw = std::fs::read_to_string(&path).unwrap();
                        let parsed: PoolConfig = serde_json::from_str(&raw)
                            .expect("observed a torn config image");
                        assert!(parsed.tokens.len() <= 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // The surviving image is one of the written post-images.
        let survivor = load_config(&path);
        assert_eq!(survivor.tokens.len(), 1);
        assert!(survivor.tokens[0].id.starts_with("writer-"));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config(&path, &PoolConfig::default()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["config.json".to_string()]);
    }

    #[test]
    fn test_token_entry_enabled_defaults_true() {
        let entry: TokenEntry =
            serde_json::from_str(r#"{"id":"a","csrf_token":"c","session_token":"s"}"#).unwrap();
        assert!(entry.enabled);
    }
}
