//! Worker metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub mod names {
    pub const JOB_DURATION_SECONDS: &str = "vidq_worker_job_duration_seconds";
    pub const LOOP_ERRORS: &str = "vidq_worker_loop_errors_total";
    pub const CLAIMS_LOST: &str = "vidq_worker_claims_lost_total";
    pub const HEARTBEAT_FAILURES: &str = "vidq_worker_heartbeat_failures_total";
    pub const LOOPS_ACTIVE: &str = "vidq_worker_loops_active";
}

pub fn record_job_duration(outcome: &'static str, elapsed: Duration) {
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_loop_error() {
    counter!(names::LOOP_ERRORS).increment(1);
}

pub fn record_claim_lost() {
    counter!(names::CLAIMS_LOST).increment(1);
}

pub fn record_heartbeat_failure() {
    counter!(names::HEARTBEAT_FAILURES).increment(1);
}

pub fn loop_started() {
    gauge!(names::LOOPS_ACTIVE).increment(1.0);
}

pub fn loop_stopped() {
    gauge!(names::LOOPS_ACTIVE).decrement(1.0);
}
