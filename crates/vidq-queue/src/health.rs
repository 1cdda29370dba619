//! Queue health monitor.
//!
//! Periodically reads aggregate counts from the job store and keeps the latest
//! snapshot for the health endpoint and the metrics gauges. It never writes to
//! the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::QueueResult;
use crate::metrics;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between refreshes
    pub interval: Duration,
    /// Window for the recent dead/failed counts
    pub failure_window: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_window: Duration::from_secs(3600),
        }
    }
}

impl HealthMonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            interval: secs("HEALTH_MONITOR_INTERVAL_SECS", defaults.interval),
            failure_window: secs("HEALTH_FAILURE_WINDOW_SECS", defaults.failure_window),
        }
    }
}

/// Latest computed queue health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealthSnapshot {
    pub pending_count: u64,
    pub processing_count: u64,
    pub oldest_pending_age_secs: Option<u64>,
    pub dead_count_last_period: u64,
    pub failed_count_last_period: u64,
    pub period_secs: u64,
    /// When the snapshot was computed; `None` before the first refresh
    pub computed_at: Option<DateTime<Utc>>,
    /// Whether the last refresh reached the store
    pub store_reachable: bool,
}

pub struct QueueHealthMonitor {
    store: Arc<dyn JobStore>,
    config: HealthMonitorConfig,
    snapshot: RwLock<QueueHealthSnapshot>,
}

impl QueueHealthMonitor {
    pub fn new(store: Arc<dyn JobStore>, config: HealthMonitorConfig) -> Self {
        Self {
            store,
            snapshot: RwLock::new(QueueHealthSnapshot {
                period_secs: config.failure_window.as_secs(),
                ..Default::default()
            }),
            config,
        }
    }

    pub async fn snapshot(&self) -> QueueHealthSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Recompute the snapshot now.
    ///
    /// On store failure the previous counts are kept and the snapshot is
    /// flagged unreachable.
    pub async fn refresh(&self) -> QueueResult<QueueHealthSnapshot> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.config.failure_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        match self.store.stats(now - window).await {
            Ok(stats) => {
                let snapshot = QueueHealthSnapshot {
                    pending_count: stats.pending,
                    processing_count: stats.processing,
                    oldest_pending_age_secs: stats
                        .oldest_pending_created_at
                        .map(|created| (now - created).num_seconds().max(0) as u64),
                    dead_count_last_period: stats.dead_since,
                    failed_count_last_period: stats.failed_since,
                    period_secs: self.config.failure_window.as_secs(),
                    computed_at: Some(now),
                    store_reachable: true,
                };
                metrics::record_snapshot(&snapshot);
                *self.snapshot.write().await = snapshot.clone();
                Ok(snapshot)
            }
            Err(e) => {
                self.snapshot.write().await.store_reachable = false;
                Err(e)
            }
        }
    }

    /// Refresh on an interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "Starting queue health monitor");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(snapshot) => debug!(
                            pending = snapshot.pending_count,
                            processing = snapshot.processing_count,
                            "Queue health refreshed"
                        ),
                        Err(e) => warn!(error = %e, "Queue health refresh failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Queue health monitor stopped");
                        return;
                    }
                }
            }
        }
    }
}
