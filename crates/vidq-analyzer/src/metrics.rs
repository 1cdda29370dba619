//! Analyzer pool metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub mod names {
    pub const ANALYZER_CALLS: &str = "vidq_analyzer_calls_total";
    pub const ANALYZER_LATENCY_SECONDS: &str = "vidq_analyzer_latency_seconds";
    pub const POOL_IN_FLIGHT: &str = "vidq_analyzer_pool_in_flight";
    pub const CIRCUIT_OPENED: &str = "vidq_analyzer_circuit_opened_total";
    pub const POOL_EXHAUSTED: &str = "vidq_analyzer_pool_exhausted_total";
    pub const FAILOVERS: &str = "vidq_analyzer_failovers_total";
}

pub fn record_call(region: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        names::ANALYZER_CALLS,
        "region" => region.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::ANALYZER_LATENCY_SECONDS, "region" => region.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn set_in_flight(region: &str, in_flight: usize) {
    gauge!(names::POOL_IN_FLIGHT, "region" => region.to_string()).set(in_flight as f64);
}

pub fn record_circuit_opened(region: &str) {
    counter!(names::CIRCUIT_OPENED, "region" => region.to_string()).increment(1);
}

pub fn record_exhausted() {
    counter!(names::POOL_EXHAUSTED).increment(1);
}

pub fn record_failover(from: &str, to: &str) {
    counter!(
        names::FAILOVERS,
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}
