//! Retry utilities with exponential backoff.
//!
//! Used for store writes that record a job outcome, and for background
//! tasks that should not flood the logs while the store is down.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Execute an async operation, retrying while `should_retry` accepts the error.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    should_retry: R,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Consecutive-failure counter that throttles warnings while the store is down.
///
/// The first `loud` failures of a streak are logged; after that only every
/// `quiet_every`-th one is, until a success ends the streak.
#[derive(Debug)]
pub struct FailureTracker {
    streak: u32,
    loud: u32,
    quiet_every: u32,
}

impl FailureTracker {
    pub fn new(loud: u32) -> Self {
        Self {
            streak: 0,
            loud,
            quiet_every: 50,
        }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.loud {
            info!(failures = self.streak, "Recovered after failure streak");
        }
        self.streak = 0;
    }

    /// Count a failure; returns whether it should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak <= self.loud {
            return true;
        }
        if self.streak == self.loud + 1 {
            warn!(
                failures = self.streak,
                "Failure streak continues, throttling warnings"
            );
        }
        (self.streak - self.loud) % self.quiet_every == 0
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_throttles_long_streaks() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        let logged = (0..100).filter(|_| tracker.record_failure()).count();
        assert_eq!(logged, 2);
        assert_eq!(tracker.failure_count(), 102);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("test");
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, |_: &&str| true, || {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_stops_on_non_retryable() {
        let config = RetryConfig::new("test");
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry_async(&config, |e: &&str| *e != "fatal", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
