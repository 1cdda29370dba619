//! Queue metrics.

use metrics::{counter, gauge};

use crate::health::QueueHealthSnapshot;

pub mod names {
    pub const JOBS_ENQUEUED: &str = "vidq_jobs_enqueued_total";
    pub const JOBS_CLAIMED: &str = "vidq_jobs_claimed_total";
    pub const CLAIM_CONFLICTS: &str = "vidq_claim_conflicts_total";
    pub const STALE_RECLAIMS: &str = "vidq_stale_reclaims_total";
    /// Terminal and requeue transitions, labelled by outcome.
    pub const JOB_TRANSITIONS: &str = "vidq_job_transitions_total";

    pub const QUEUE_PENDING: &str = "vidq_queue_pending";
    pub const QUEUE_PROCESSING: &str = "vidq_queue_processing";
    pub const QUEUE_OLDEST_PENDING_SECONDS: &str = "vidq_queue_oldest_pending_seconds";
    pub const QUEUE_DEAD_RECENT: &str = "vidq_queue_dead_recent";
    pub const QUEUE_FAILED_RECENT: &str = "vidq_queue_failed_recent";
}

pub fn record_enqueued() {
    counter!(names::JOBS_ENQUEUED).increment(1);
}

pub fn record_claim(stale: bool) {
    counter!(names::JOBS_CLAIMED).increment(1);
    if stale {
        counter!(names::STALE_RECLAIMS).increment(1);
    }
}

pub fn record_claim_conflict() {
    counter!(names::CLAIM_CONFLICTS).increment(1);
}

/// Record a job leaving `processing` (`complete`, `requeue`, `release`, `fail`, `dead`).
pub fn record_transition(outcome: &'static str) {
    counter!(names::JOB_TRANSITIONS, "outcome" => outcome).increment(1);
}

pub fn record_snapshot(snapshot: &QueueHealthSnapshot) {
    gauge!(names::QUEUE_PENDING).set(snapshot.pending_count as f64);
    gauge!(names::QUEUE_PROCESSING).set(snapshot.processing_count as f64);
    gauge!(names::QUEUE_OLDEST_PENDING_SECONDS)
        .set(snapshot.oldest_pending_age_secs.unwrap_or(0) as f64);
    gauge!(names::QUEUE_DEAD_RECENT).set(snapshot.dead_count_last_period as f64);
    gauge!(names::QUEUE_FAILED_RECENT).set(snapshot.failed_count_last_period as f64);
}
