//! Application state.

use std::sync::Arc;

use vidq_analyzer::AnalyzerPool;
use vidq_queue::{HealthMonitorConfig, QueueHealthMonitor, Stores};

use crate::config::{ApiConfig, SubmissionConfig};
use crate::services::SubmissionService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub submission: Arc<SubmissionService>,
    pub monitor: Arc<QueueHealthMonitor>,
    pub pool: Option<AnalyzerPool>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        submission_config: SubmissionConfig,
        stores: Stores,
        pool: Option<AnalyzerPool>,
        monitor_config: HealthMonitorConfig,
    ) -> Self {
        let submission_config = submission_config.fit_within(config.request_timeout);
        let monitor = Arc::new(QueueHealthMonitor::new(stores.jobs.clone(), monitor_config));
        let submission = Arc::new(SubmissionService::new(
            stores.jobs,
            stores.cache,
            pool.clone(),
            submission_config,
        ));
        Self {
            config,
            submission,
            monitor,
            pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vidq_queue::{MemoryCacheStore, MemoryJobStore};

    #[test]
    fn test_inline_timeout_fits_request_timeout() {
        let state = AppState::new(
            ApiConfig {
                request_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            SubmissionConfig {
                inline_timeout: Duration::from_secs(60),
                ..Default::default()
            },
            Stores {
                jobs: Arc::new(MemoryJobStore::new()),
                cache: Arc::new(MemoryCacheStore::new()),
            },
            None,
            HealthMonitorConfig::default(),
        );
        assert!(state.submission.config().inline_timeout < state.config.request_timeout);
    }
}
