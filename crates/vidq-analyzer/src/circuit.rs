//! Per-handle circuit breaker.
//!
//! Closed handles accept work. After `failure_threshold` consecutive transient
//! failures (or an explicit trip) the handle opens for a cool-down, then
//! half-opens: the next outcome either closes it or reopens it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Whether the handle may take work at `now`. Moves an expired open
    /// circuit to half-open.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open { until } if now >= until => {
                self.state = CircuitState::HalfOpen;
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    /// Whether the circuit still refuses work at `now`, without changing state.
    pub fn is_open(&self, now: Instant) -> bool {
        matches!(self.state, CircuitState::Open { until } if now < until)
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a transient failure. Returns true if this opened the circuit.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    self.trip(now + self.cooldown);
                    true
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                    false
                }
            }
            CircuitState::HalfOpen => {
                self.trip(now + self.cooldown);
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    /// Open until `until`, extending an existing open window if later.
    pub fn trip(&mut self, until: Instant) {
        self.state = match self.state {
            CircuitState::Open { until: current } if current > until => {
                CircuitState::Open { until: current }
            }
            _ => CircuitState::Open { until },
        };
    }

    /// When an open circuit re-admits work.
    pub fn reopens_at(&self) -> Option<Instant> {
        match self.state {
            CircuitState::Open { until } => Some(until),
            _ => None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> &CircuitState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_readmits_after_cooldown() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let now = Instant::now();

        assert!(!breaker.record_failure(now));
        assert!(!breaker.record_failure(now));
        assert!(breaker.record_failure(now));
        assert!(!breaker.allow(now + Duration::from_secs(29)));
        assert!(breaker.allow(now + Duration::from_secs(30)));
        assert_eq!(breaker.state(), &CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_open_does_not_half_open() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let now = Instant::now();
        breaker.record_failure(now);

        assert!(breaker.is_open(now));
        let later = now + Duration::from_secs(10);
        assert!(!breaker.is_open(later));
        assert_eq!(breaker.reopens_at(), Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let now = Instant::now();
        breaker.trip(now);
        assert!(breaker.allow(now));

        assert!(breaker.record_failure(now));
        assert_eq!(breaker.reopens_at(), Some(now + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        let now = Instant::now();
        breaker.record_failure(now);
        breaker.record_success();
        assert!(!breaker.record_failure(now));
    }
}
