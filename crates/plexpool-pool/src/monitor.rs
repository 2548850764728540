//! Background health monitor.
//!
//! One task periodically probes every enabled client's rate-limit
//! endpoint (which consumes no quota), applies the results to the pool,
//! and emits a notification for every client whose derived state changed.
//! The tick sleep is cancellable: disabling the monitor or changing its
//! interval takes effect immediately, and shutdown never waits out a
//! multi-hour sleep.

use crate::client::ClientState;
use crate::notify;
use crate::pool::ClientPool;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of probing one client.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub id: String,
    pub before: ClientState,
    pub after: ClientState,
    /// Probe error, when the fetch itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckOutcome {
    /// Whether the derived state changed across the check.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Run one health-check cycle: every enabled client, or a single client
/// by id regardless of its enable flag. Runs regardless of the monitor's
/// `enable` setting — manual tests use this directly.
///
/// Session handles are snapshotted under the pool lock; all fetches run
/// outside it, sequentially. A fetch whose client was removed mid-flight
/// is discarded.
pub async fn run_health_check(pool: &ClientPool, only: Option<&str>) -> Vec<CheckOutcome> {
    let targets = pool.check_targets(only).await;
    let monitor_config = pool.monitor_config().await;
    let mut outcomes = Vec::with_capacity(targets.len());

    for (id, session, before) in targets {
        let mut probe_error = None;
        match session.fetch_rate_limits().await {
            Ok(limits) => {
                if !pool.apply_rate_limits(&id, limits).await {
                    debug!(client = %id, "client removed during health check; result discarded");
                    continue;
                }
            }
            Err(e) => {
                if e.is_session_invalid() {
                    if !pool.mark_session_invalid(&id).await {
                        continue;
                    }
                } else {
                    // Transient probe failures leave the last known state.
                    warn!(client = %id, error = %e, "health check fetch failed");
                }
                probe_error = Some(e.to_string());
            }
        }

        let Some(after) = pool.state_of(&id).await else {
            continue;
        };
        let outcome = CheckOutcome {
            id: id.clone(),
            before,
            after,
            error: probe_error,
        };
        if outcome.changed() {
            let subject = format!("plexpool: client '{id}' is now {after}");
            let body = format!(
                "Client '{id}' changed from {before} to {after}.{}",
                outcome
                    .error
                    .as_deref()
                    .map(|e| format!("\nLast error: {e}"))
                    .unwrap_or_default()
            );
            notify::send(&monitor_config, &subject, &body).await;
        }
        outcomes.push(outcome);
    }

    outcomes
}

/// Handle to a spawned monitor task.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor, cancelling any sleeping tick.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// The background monitor task.
pub struct Monitor {
    pool: Arc<ClientPool>,
}

impl Monitor {
    /// Create a monitor over the given pool.
    #[must_use]
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Spawn the monitor loop.
    ///
    /// Disabled → parked until the config changes. Enabled → cancellable
    /// sleep of the configured interval, then one cycle. A config change
    /// (interval, enable flag) cancels the current sleep and re-reads the
    /// config; shutdown exits promptly from either state.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut config_rx = self.pool.subscribe_config();
        let pool = self.pool;

        let handle = tokio::spawn(async move {
            info!("health monitor started");
            loop {
                let config = pool.monitor_config().await;
                if !config.enable {
                    tokio::select! {
                        _ = config_rx.changed() => continue,
                        _ = shutdown_rx.changed() => break,
                    }
                }

                let interval = config.interval();
                debug!(secs = interval.as_secs(), "monitor sleeping until next tick");
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let outcomes = run_health_check(&pool, None).await;
                        let changed = outcomes.iter().filter(|o| o.changed()).count();
                        info!(checked = outcomes.len(), changed, "monitor tick complete");
                    }
                    _ = config_rx.changed() => {
                        debug!("monitor reconfigured; restarting tick");
                        continue;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("health monitor stopped");
        });

        MonitorHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}
