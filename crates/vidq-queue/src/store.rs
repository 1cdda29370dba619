//! Durable queue store contract.
//!
//! Every change to a job's `status`, `attempts` or `worker_id` goes through
//! [`JobStore::transactional_update`], which applies a [`JobMutation`] only if the
//! stored job still satisfies an [`Expectation`] at commit time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use vidq_models::{ContentAnalysis, Job, JobId, JobStatus};

use crate::error::QueueResult;

/// Persistent storage for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job and return its id.
    async fn insert(&self, job: Job) -> QueueResult<JobId>;

    /// Fetch a job, failing with `JobNotFound` for unknown ids.
    async fn get(&self, id: &JobId) -> QueueResult<Job>;

    /// Jobs a worker may claim, ordered by `priority` then `created_at`.
    ///
    /// Includes `pending` jobs and `processing` jobs whose worker was last seen
    /// alive before `stale_before`.
    async fn list_claimable(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>>;

    /// Apply `mutation` if the job still matches `expected`.
    ///
    /// Returns `Ok(false)` without side effects when it does not.
    async fn transactional_update(
        &self,
        id: &JobId,
        expected: Expectation,
        mutation: JobMutation,
    ) -> QueueResult<bool>;

    /// Aggregate counts for health reporting. Terminal counts include jobs
    /// that finished at or after `since`.
    async fn stats(&self, since: DateTime<Utc>) -> QueueResult<QueueStats>;

    /// Cheap reachability probe.
    async fn ping(&self) -> QueueResult<()>;
}

/// Condition a job must satisfy for a transactional update to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub status: JobStatus,
    /// Claim generation fence: the `attempts` value observed by the caller.
    pub attempts: Option<u32>,
    /// Require the claiming worker to have been silent since this instant.
    pub idle_since: Option<DateTime<Utc>>,
}

impl Expectation {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            attempts: None,
            idle_since: None,
        }
    }

    /// The job is still held by the claim that produced `attempts`.
    pub fn claimed(attempts: u32) -> Self {
        Self::status(JobStatus::Processing).with_attempts(attempts)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn idle_since(mut self, cutoff: DateTime<Utc>) -> Self {
        self.idle_since = Some(cutoff);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if job.status != self.status {
            return false;
        }
        if let Some(attempts) = self.attempts {
            if job.attempts != attempts {
                return false;
            }
        }
        match (self.idle_since, job.last_seen_alive()) {
            (Some(cutoff), Some(seen)) => seen < cutoff,
            _ => true,
        }
    }
}

impl From<JobStatus> for Expectation {
    fn from(status: JobStatus) -> Self {
        Self::status(status)
    }
}

/// A state transition applied to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    /// pending (or stale processing) -> processing, attempts + 1
    Claim { worker_id: String, at: DateTime<Utc> },
    /// Liveness signal from the claiming worker
    Heartbeat { at: DateTime<Utc> },
    /// processing -> completed with the analyzer output
    Complete {
        result: ContentAnalysis,
        at: DateTime<Utc>,
    },
    /// processing -> pending after a retryable failure
    Requeue { error: String },
    /// processing -> pending without consuming the retry budget
    Release { reason: String },
    /// processing -> failed (input rejected)
    Fail { error: String, at: DateTime<Utc> },
    /// -> dead (retry budget exhausted)
    Dead { error: String, at: DateTime<Utc> },
}

impl JobMutation {
    pub fn claim(worker_id: impl Into<String>) -> Self {
        Self::Claim {
            worker_id: worker_id.into(),
            at: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat { at: Utc::now() }
    }

    pub fn complete(result: ContentAnalysis) -> Self {
        Self::Complete {
            result,
            at: Utc::now(),
        }
    }

    pub fn requeue(error: impl Into<String>) -> Self {
        Self::Requeue {
            error: error.into(),
        }
    }

    pub fn release(reason: impl Into<String>) -> Self {
        Self::Release {
            reason: reason.into(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
            at: Utc::now(),
        }
    }

    pub fn dead(error: impl Into<String>) -> Self {
        Self::Dead {
            error: error.into(),
            at: Utc::now(),
        }
    }

    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            JobMutation::Claim { .. } => "claim",
            JobMutation::Heartbeat { .. } => "heartbeat",
            JobMutation::Complete { .. } => "complete",
            JobMutation::Requeue { .. } => "requeue",
            JobMutation::Release { .. } => "release",
            JobMutation::Fail { .. } => "fail",
            JobMutation::Dead { .. } => "dead",
        }
    }

    /// Apply the transition to an in-memory job.
    pub fn apply(&self, job: &mut Job) {
        match self {
            JobMutation::Claim { worker_id, at } => {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.worker_id = Some(worker_id.clone());
                job.started_at = Some(*at);
                job.heartbeat_at = Some(*at);
            }
            JobMutation::Heartbeat { at } => {
                job.heartbeat_at = Some(*at);
            }
            JobMutation::Complete { result, at } => {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
                job.completed_at = Some(*at);
                job.last_error = None;
            }
            JobMutation::Requeue { error } => {
                job.status = JobStatus::Pending;
                job.heartbeat_at = None;
                job.last_error = Some(error.clone());
            }
            JobMutation::Release { reason } => {
                job.status = JobStatus::Pending;
                job.released_claims += 1;
                job.heartbeat_at = None;
                job.last_error = Some(reason.clone());
            }
            JobMutation::Fail { error, at } => {
                job.status = JobStatus::Failed;
                job.last_error = Some(error.clone());
                job.completed_at = Some(*at);
            }
            JobMutation::Dead { error, at } => {
                job.status = JobStatus::Dead;
                job.last_error = Some(error.clone());
                job.completed_at = Some(*at);
            }
        }
    }
}

/// Point-in-time aggregates over the job collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub oldest_pending_created_at: Option<DateTime<Utc>>,
    pub dead_since: u64,
    pub failed_since: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vidq_models::{Fingerprint, JobPayload};

    fn job() -> Job {
        Job::new(
            JobPayload::new("https://example.com/a.mp4"),
            Fingerprint::from_string("fp"),
        )
    }

    #[test]
    fn test_claim_increments_attempts_and_sets_owner() {
        let mut job = job();
        JobMutation::claim("worker-1").apply(&mut job);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.worker_id.as_deref(), Some("worker-1"));
        assert!(job.started_at.is_some());
        assert_eq!(job.heartbeat_at, job.started_at);
    }

    #[test]
    fn test_release_refunds_budget() {
        let mut job = job();
        JobMutation::claim("w").apply(&mut job);
        JobMutation::release("no analyzer capacity").apply(&mut job);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.charged_attempts(), 0);
    }

    #[test]
    fn test_expectation_fences_on_attempts() {
        let mut job = job();
        JobMutation::claim("w1").apply(&mut job);
        let fence = Expectation::claimed(job.attempts);
        assert!(fence.matches(&job));

        JobMutation::claim("w2").apply(&mut job);
        assert!(!fence.matches(&job));
        assert!(Expectation::from(JobStatus::Processing).matches(&job));
    }

    #[test]
    fn test_expectation_idle_since_rejects_recent_heartbeat() {
        let mut job = job();
        JobMutation::claim("w1").apply(&mut job);
        let cutoff = Utc::now() - Duration::minutes(5);
        assert!(!Expectation::claimed(1).idle_since(cutoff).matches(&job));

        job.heartbeat_at = Some(Utc::now() - Duration::minutes(10));
        assert!(Expectation::claimed(1).idle_since(cutoff).matches(&job));
    }
}
