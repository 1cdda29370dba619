//! Idle backoff policy for the polling loop.

use std::time::Duration;

/// Sleep schedule between scans of an empty queue.
///
/// Each empty scan multiplies the sleep by `factor` up to `max`; finding work
/// resets it to `min`. Holds no timers, so it can be driven directly.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl IdleBackoff {
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            factor: factor.max(1.0),
            current: min,
        }
    }

    /// Delay to sleep after an empty scan (or a failed one).
    pub fn on_empty(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    /// The scan found work: scan again right away, restart the schedule.
    pub fn on_work(&mut self) -> Duration {
        self.current = self.min;
        Duration::ZERO
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}
