//! Regional analyzer pool.
//!
//! A fixed set of handles, one per region or credential, each with a
//! concurrency capacity and its own circuit breaker. Work goes to the
//! least-loaded healthy handle, round-robin among equals. A transient failure
//! is retried once on a different handle before it is surfaced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vidq_models::{ContentAnalysis, JobPayload};

use crate::analyzer::Analyzer;
use crate::circuit::CircuitBreaker;
use crate::error::{AnalyzerError, AnalyzerResult, PoolError, PoolResult};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct AnalyzerPoolConfig {
    /// Bounded wait for a free handle
    pub acquire_timeout: Duration,
    /// Bounded wait for a different handle when failing over
    pub failover_wait: Duration,
    /// Hard limit on a single analyzer call
    pub call_timeout: Duration,
    /// Consecutive transient failures before a handle is taken out
    pub failure_threshold: u32,
    /// How long an unhealthy handle stays out of selection
    pub cooldown: Duration,
}

impl Default for AnalyzerPoolConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            failover_wait: Duration::from_secs(5),
            call_timeout: Duration::from_secs(600),
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl AnalyzerPoolConfig {
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
            acquire_timeout: secs("ANALYZER_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
            failover_wait: secs("ANALYZER_FAILOVER_WAIT_SECS", defaults.failover_wait),
            call_timeout: secs("ANALYZER_CALL_TIMEOUT_SECS", defaults.call_timeout),
            failure_threshold: std::env::var("ANALYZER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            cooldown: secs("ANALYZER_COOLDOWN_SECS", defaults.cooldown),
        }
    }
}

/// A capability handle bound to one region.
#[derive(Clone)]
pub struct AnalyzerHandle {
    pub region: String,
    pub capacity: usize,
    pub analyzer: Arc<dyn Analyzer>,
}

impl AnalyzerHandle {
    pub fn new(region: impl Into<String>, capacity: usize, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            region: region.into(),
            capacity,
            analyzer,
        }
    }
}

/// Point-in-time view of one handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandleStatus {
    pub region: String,
    pub capacity: usize,
    pub in_flight: usize,
    pub healthy: bool,
}

struct Slot {
    handle: AnalyzerHandle,
    in_flight: usize,
    breaker: CircuitBreaker,
}

struct PoolState {
    slots: Vec<Slot>,
    cursor: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    released: Notify,
    config: AnalyzerPoolConfig,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lease(self: &Arc<Self>, exclude: Option<usize>, now: Instant) -> Option<PoolLease> {
        let mut state = self.lock();
        let count = state.slots.len();
        let start = state.cursor;
        let mut best: Option<(usize, f64)> = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let slot = &mut state.slots[index];
            let healthy = slot.breaker.allow(now);
            if Some(index) == exclude || !healthy || slot.in_flight >= slot.handle.capacity {
                continue;
            }
            let load = slot.in_flight as f64 / slot.handle.capacity as f64;
            if best.map_or(true, |(_, lowest)| load < lowest) {
                best = Some((index, load));
            }
        }

        let (index, _) = best?;
        state.cursor = (index + 1) % count;
        let slot = &mut state.slots[index];
        slot.in_flight += 1;
        metrics::set_in_flight(&slot.handle.region, slot.in_flight);

        Some(PoolLease {
            pool: Arc::clone(self),
            index,
            region: slot.handle.region.clone(),
            analyzer: Arc::clone(&slot.handle.analyzer),
        })
    }

    /// Earliest future instant at which an open circuit re-admits work.
    fn next_readmission(&self, exclude: Option<usize>, now: Instant) -> Option<Instant> {
        self.lock()
            .slots
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != exclude)
            .filter_map(|(_, slot)| slot.breaker.reopens_at())
            .filter(|at| *at > now)
            .min()
    }

    fn release(&self, index: usize) {
        {
            let mut state = self.lock();
            if let Some(slot) = state.slots.get_mut(index) {
                slot.in_flight = slot.in_flight.saturating_sub(1);
                metrics::set_in_flight(&slot.handle.region, slot.in_flight);
            }
        }
        self.released.notify_waiters();
    }

    fn record_outcome(&self, index: usize, outcome: &AnalyzerResult<ContentAnalysis>) {
        let now = Instant::now();
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return;
        };

        match outcome {
            Ok(_) => slot.breaker.record_success(),
            Err(AnalyzerError::InvalidInput(_)) => {}
            Err(AnalyzerError::RateLimited(_)) => {
                let cooldown = slot.breaker.cooldown();
                slot.breaker.trip(now + cooldown);
                warn!(region = %slot.handle.region, ?cooldown, "Analyzer rate limited, cooling down");
                metrics::record_circuit_opened(&slot.handle.region);
            }
            Err(e) => {
                if slot.breaker.record_failure(now) {
                    warn!(
                        region = %slot.handle.region,
                        error = %e,
                        cooldown = ?slot.breaker.cooldown(),
                        "Analyzer handle marked unhealthy"
                    );
                    metrics::record_circuit_opened(&slot.handle.region);
                }
            }
        }
    }
}

/// Exclusive use of one unit of a handle's capacity. Released on drop.
pub struct PoolLease {
    pool: Arc<PoolInner>,
    index: usize,
    region: String,
    analyzer: Arc<dyn Analyzer>,
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("index", &self.index)
            .field("region", &self.region)
            .finish()
    }
}

impl PoolLease {
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Run one analysis on this handle, bounded by the call timeout.
    pub async fn analyze(&self, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis> {
        let call_timeout = self.pool.config.call_timeout;
        let started = Instant::now();

        let outcome = match tokio::time::timeout(call_timeout, self.analyzer.analyze(payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(AnalyzerError::Timeout(call_timeout)),
        };

        self.pool.record_outcome(self.index, &outcome);
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_call(&self.region, label, started.elapsed());

        outcome.map(|mut analysis| {
            analysis
                .analyzer_region
                .get_or_insert_with(|| self.region.clone());
            analysis
                .model
                .get_or_insert_with(|| self.analyzer.name().to_string());
            analysis
        })
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Bounded set of analyzer handles with load distribution and failover.
#[derive(Clone)]
pub struct AnalyzerPool {
    inner: Arc<PoolInner>,
}

impl AnalyzerPool {
    pub fn new(handles: Vec<AnalyzerHandle>, config: AnalyzerPoolConfig) -> Self {
        let slots = handles
            .into_iter()
            .map(|handle| Slot {
                handle,
                in_flight: 0,
                breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown),
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState { slots, cursor: 0 }),
                released: Notify::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &AnalyzerPoolConfig {
        &self.inner.config
    }

    /// Acquire a handle, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> PoolResult<PoolLease> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Acquire a handle, waiting at most `wait`.
    ///
    /// Cancel-safe: dropping the future before it resolves holds nothing.
    pub async fn acquire_timeout(&self, wait: Duration) -> PoolResult<PoolLease> {
        self.acquire_excluding(None, wait).await
    }

    /// Acquire without waiting.
    pub fn try_acquire(&self) -> Option<PoolLease> {
        self.inner.try_lease(None, Instant::now())
    }

    /// Give a lease back. Dropping it has the same effect.
    pub fn release(&self, lease: PoolLease) {
        drop(lease);
    }

    async fn acquire_excluding(
        &self,
        exclude: Option<usize>,
        wait: Duration,
    ) -> PoolResult<PoolLease> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for wake-ups before checking, so a release between the
            // check and the wait is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let now = Instant::now();
            if let Some(lease) = self.inner.try_lease(exclude, now) {
                return Ok(lease);
            }
            if now >= deadline {
                metrics::record_exhausted();
                debug!(?wait, "No analyzer handle available");
                return Err(PoolError::Exhausted(wait));
            }

            let wake = self
                .inner
                .next_readmission(exclude, now)
                .map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Take a handle out of selection for `duration`. Returns false for an
    /// unknown region.
    pub fn mark_unhealthy(&self, region: &str, duration: Duration) -> bool {
        let until = Instant::now() + duration;
        let mut state = self.inner.lock();
        let mut found = false;
        for slot in state.slots.iter_mut().filter(|s| s.handle.region == region) {
            slot.breaker.trip(until);
            found = true;
        }
        if found {
            warn!(region = %region, ?duration, "Analyzer handle marked unhealthy");
            metrics::record_circuit_opened(region);
        }
        found
    }

    /// Run an analysis on `lease`, failing over once to a different handle on
    /// a transient error.
    pub async fn run(&self, lease: PoolLease, payload: &JobPayload) -> PoolResult<ContentAnalysis> {
        let error = match lease.analyze(payload).await {
            Ok(analysis) => return Ok(analysis),
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => e,
        };

        let failed_index = lease.index;
        let failed_region = lease.region.clone();
        drop(lease);

        let Ok(other) = self
            .acquire_excluding(Some(failed_index), self.inner.config.failover_wait)
            .await
        else {
            debug!(region = %failed_region, error = %error, "No other handle for failover");
            return Err(error.into());
        };

        info!(
            from = %failed_region,
            to = %other.region,
            error = %error,
            "Retrying analysis on another handle"
        );
        metrics::record_failover(&failed_region, &other.region);
        Ok(other.analyze(payload).await?)
    }

    /// Acquire a handle and run an analysis with failover.
    pub async fn analyze(&self, payload: &JobPayload) -> PoolResult<ContentAnalysis> {
        let lease = self.acquire().await?;
        self.run(lease, payload).await
    }

    /// Free capacity on handles that currently accept work.
    pub fn available_capacity(&self) -> usize {
        let now = Instant::now();
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .filter(|slot| !slot.breaker.is_open(now))
            .map(|slot| slot.handle.capacity.saturating_sub(slot.in_flight))
            .sum()
    }

    pub fn status(&self) -> Vec<HandleStatus> {
        let now = Instant::now();
        let state = self.inner.lock();
        state
            .slots
            .iter()
            .map(|slot| HandleStatus {
                region: slot.handle.region.clone(),
                capacity: slot.handle.capacity,
                in_flight: slot.in_flight,
                healthy: !slot.breaker.is_open(now),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAnalyzer;
    use async_trait::async_trait;
    use crate::circuit::CircuitState;
    use mockall::mock;

    mock! {
        Remote {}

        #[async_trait]
        impl Analyzer for Remote {
            async fn analyze(&self, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis>;
        }
    }

    fn payload() -> JobPayload {
        JobPayload::new("https://example.com/v.mp4")
    }

    fn config() -> AnalyzerPoolConfig {
        AnalyzerPoolConfig {
            acquire_timeout: Duration::from_secs(5),
            failover_wait: Duration::from_millis(100),
            call_timeout: Duration::from_secs(60),
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }

    fn pool(handles: Vec<(&str, usize, Arc<ScriptedAnalyzer>)>) -> AnalyzerPool {
        AnalyzerPool::new(
            handles
                .into_iter()
                .map(|(region, capacity, analyzer)| {
                    AnalyzerHandle::new(region, capacity, analyzer as Arc<dyn Analyzer>)
                })
                .collect(),
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_prefers_least_loaded_then_rotates() {
        let pool = pool(vec![
            ("us", 2, Arc::new(ScriptedAnalyzer::succeeding())),
            ("eu", 2, Arc::new(ScriptedAnalyzer::succeeding())),
        ]);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.region(), b.region());

        drop(a);
        let c = pool.acquire().await.unwrap();
        assert_ne!(c.region(), b.region());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_full() {
        let pool = pool(vec![("us", 1, Arc::new(ScriptedAnalyzer::succeeding()))]);
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire_timeout(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err, PoolError::Exhausted(Duration::from_secs(2)));
        assert_eq!(pool.available_capacity(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let pool = pool(vec![("us", 1, Arc::new(ScriptedAnalyzer::succeeding()))]);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.release(held);

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(lease.region(), "us");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_released_on_every_exit_path() {
        let analyzer = Arc::new(ScriptedAnalyzer::succeeding());
        analyzer.push(Err(AnalyzerError::invalid_input("not a video")));
        let pool = pool(vec![("us", 1, analyzer)]);

        assert!(pool.analyze(&payload()).await.is_err());
        assert_eq!(pool.available_capacity(), 1);
        assert!(pool.analyze(&payload()).await.is_ok());
        assert_eq!(pool.available_capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_once_on_other_handle() {
        let us = Arc::new(ScriptedAnalyzer::failing(AnalyzerError::unavailable("503")));
        let eu = Arc::new(ScriptedAnalyzer::succeeding());
        let pool = pool(vec![("us", 1, us.clone()), ("eu", 1, eu.clone())]);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.region(), "us");
        let analysis = pool.run(lease, &payload()).await.unwrap();

        assert_eq!(analysis.analyzer_region.as_deref(), Some("eu"));
        assert_eq!(us.calls(), 1);
        assert_eq!(eu.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_happens_only_once() {
        let mut first = MockRemote::new();
        first
            .expect_analyze()
            .times(1)
            .returning(|_| Err(AnalyzerError::Timeout(Duration::from_secs(1))));
        let mut second = MockRemote::new();
        second
            .expect_analyze()
            .times(1)
            .returning(|_| Err(AnalyzerError::rate_limited("quota")));

        let pool = AnalyzerPool::new(
            vec![
                AnalyzerHandle::new("us", 1, Arc::new(first)),
                AnalyzerHandle::new("eu", 1, Arc::new(second)),
            ],
            config(),
        );

        let err = pool.analyze(&payload()).await.unwrap_err();
        assert_eq!(err, PoolError::Analyzer(AnalyzerError::rate_limited("quota")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_is_not_retried() {
        let us = Arc::new(ScriptedAnalyzer::failing(AnalyzerError::invalid_input("bad url")));
        let eu = Arc::new(ScriptedAnalyzer::succeeding());
        let pool = pool(vec![("us", 1, us.clone()), ("eu", 1, eu.clone())]);

        let lease = pool.acquire().await.unwrap();
        let err = pool.run(lease, &payload()).await.unwrap_err();
        assert!(matches!(err, PoolError::Analyzer(AnalyzerError::InvalidInput(_))));
        assert_eq!(eu.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_open_circuit_until_cooldown() {
        let flaky = Arc::new(ScriptedAnalyzer::failing(AnalyzerError::unavailable("down")));
        let pool = pool(vec![("us", 2, flaky)]);

        for _ in 0..2 {
            let _ = pool.analyze(&payload()).await;
        }
        assert_eq!(pool.available_capacity(), 0);
        assert!(!pool.status()[0].healthy);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.available_capacity(), 2);
        assert!(pool.status()[0].healthy);
        // Reading health leaves the breaker for the next acquire to half-open
        assert!(matches!(
            pool.inner.lock().slots[0].breaker.state(),
            CircuitState::Open { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_unhealthy_skips_handle() {
        let pool = pool(vec![
            ("us", 1, Arc::new(ScriptedAnalyzer::succeeding())),
            ("eu", 1, Arc::new(ScriptedAnalyzer::succeeding())),
        ]);
        assert!(pool.mark_unhealthy("us", Duration::from_secs(10)));
        assert!(!pool.mark_unhealthy("ap", Duration::from_secs(10)));

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.region(), "eu");
        drop(lease);

        // A waiter blocked only by the cool-down wakes when it ends.
        let _eu = pool.acquire().await.unwrap();
        let lease = pool.acquire_timeout(Duration::from_secs(20)).await.unwrap();
        assert_eq!(lease.region(), "us");
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_enforced() {
        let slow = Arc::new(
            ScriptedAnalyzer::succeeding().with_delay(Duration::from_secs(120)),
        );
        let pool = pool(vec![("us", 1, slow)]);

        let err = pool.analyze(&payload()).await.unwrap_err();
        assert_eq!(
            err,
            PoolError::Analyzer(AnalyzerError::Timeout(Duration::from_secs(60)))
        );
        assert_eq!(pool.available_capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_holds_nothing() {
        let pool = pool(vec![("us", 1, Arc::new(ScriptedAnalyzer::succeeding()))]);
        let held = pool.acquire().await.unwrap();

        let attempt = tokio::time::timeout(
            Duration::from_millis(10),
            pool.acquire_timeout(Duration::from_secs(60)),
        )
        .await;
        assert!(attempt.is_err());

        drop(held);
        assert_eq!(pool.available_capacity(), 1);
    }
}
