//! Worker configuration.

use std::time::Duration;

use tracing::warn;
use vidq_queue::ClaimConfig;

use crate::backoff::IdleBackoff;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of independent worker loops in this process
    pub concurrency: usize,
    /// Prefix for generated worker identities
    pub worker_name: String,
    /// Candidates fetched per claim scan
    pub claim_batch_size: usize,
    /// Charged attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// A processing job without a heartbeat for this long is reclaimable
    pub stale_after: Duration,
    /// How often a claimed job's heartbeat is refreshed
    pub heartbeat_interval: Duration,
    /// Bounded wait for an analyzer handle before the claim is released
    pub acquire_timeout: Duration,
    /// Idle sleep after the first empty scan
    pub idle_min: Duration,
    /// Cap on the idle sleep
    pub idle_max: Duration,
    /// Growth factor of the idle sleep per empty scan
    pub idle_factor: f64,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
    /// TTL of the cache entry written on completion
    pub cache_ttl: Duration,
    /// Port for the Prometheus listener, if any
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            worker_name: "worker".to_string(),
            claim_batch_size: 10,
            max_attempts: 3,
            stale_after: Duration::from_secs(600), // 10 minutes
            heartbeat_interval: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            idle_min: Duration::from_millis(500),
            idle_max: Duration::from_secs(30),
            idle_factor: 2.0,
            shutdown_timeout: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            env_parse::<u64>(key).map(Duration::from_secs).unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            env_parse::<u64>(key).map(Duration::from_millis).unwrap_or(default)
        };

        let config = Self {
            concurrency: env_parse("WORKER_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            worker_name: std::env::var("WORKER_NAME").unwrap_or(defaults.worker_name),
            claim_batch_size: env_parse("WORKER_CLAIM_BATCH_SIZE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.claim_batch_size),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_attempts),
            stale_after: secs("WORKER_STALE_AFTER_SECS", defaults.stale_after),
            heartbeat_interval: secs("WORKER_HEARTBEAT_SECS", defaults.heartbeat_interval),
            acquire_timeout: secs("WORKER_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
            idle_min: millis("WORKER_IDLE_MIN_MS", defaults.idle_min),
            idle_max: millis("WORKER_IDLE_MAX_MS", defaults.idle_max),
            idle_factor: env_parse("WORKER_IDLE_FACTOR")
                .filter(|f: &f64| *f >= 1.0)
                .unwrap_or(defaults.idle_factor),
            shutdown_timeout: secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            cache_ttl: secs("CACHE_TTL_SECS", defaults.cache_ttl),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
        };
        config.with_live_heartbeat()
    }

    /// Keep the heartbeat well inside the staleness window so a live claim
    /// is never reclaimed.
    pub fn with_live_heartbeat(mut self) -> Self {
        if self.stale_after.is_zero() {
            let defaults = Self::default();
            warn!(
                stale_after = ?defaults.stale_after,
                "Stale threshold of zero is invalid, using default"
            );
            self.stale_after = defaults.stale_after;
        }
        let limit = self.stale_after / 3;
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval * 2 >= self.stale_after {
            warn!(
                heartbeat_interval = ?self.heartbeat_interval,
                stale_after = ?self.stale_after,
                clamped = ?limit,
                "Heartbeat interval must be under half the stale threshold, clamping"
            );
            self.heartbeat_interval = limit;
        }
        self
    }

    pub fn claim_config(&self) -> ClaimConfig {
        ClaimConfig {
            batch_size: self.claim_batch_size,
            max_attempts: self.max_attempts,
            stale_after: self.stale_after,
        }
    }

    pub fn idle_backoff(&self) -> IdleBackoff {
        IdleBackoff::new(self.idle_min, self.idle_max, self.idle_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides_and_rejects_nonsense() {
        std::env::set_var("WORKER_MAX_ATTEMPTS", "5");
        std::env::set_var("WORKER_CONCURRENCY", "0");
        std::env::set_var("WORKER_IDLE_FACTOR", "0.5");
        std::env::set_var("WORKER_METRICS_PORT", "9100");

        let config = WorkerConfig::from_env();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.idle_factor, 2.0);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.claim_config().max_attempts, 5);

        for var in [
            "WORKER_MAX_ATTEMPTS",
            "WORKER_CONCURRENCY",
            "WORKER_IDLE_FACTOR",
            "WORKER_METRICS_PORT",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_heartbeat_is_kept_under_half_the_stale_threshold() {
        std::env::set_var("WORKER_STALE_AFTER_SECS", "60");
        std::env::set_var("WORKER_HEARTBEAT_SECS", "60");
        let config = WorkerConfig::from_env();
        assert_eq!(config.stale_after, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));

        std::env::set_var("WORKER_STALE_AFTER_SECS", "0");
        std::env::set_var("WORKER_HEARTBEAT_SECS", "30");
        let config = WorkerConfig::from_env();
        assert_eq!(config.stale_after, Duration::from_secs(600));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));

        std::env::set_var("WORKER_STALE_AFTER_SECS", "120");
        std::env::set_var("WORKER_HEARTBEAT_SECS", "10");
        let config = WorkerConfig::from_env();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));

        std::env::remove_var("WORKER_STALE_AFTER_SECS");
        std::env::remove_var("WORKER_HEARTBEAT_SECS");
    }
}
