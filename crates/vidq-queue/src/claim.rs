//! Job claim protocol.
//!
//! A worker lists claimable candidates and tries to move each one to
//! `processing` with a transactional update. The first update that commits is
//! the claim; losing a race to another worker is routine and only logged at
//! debug level.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use vidq_models::{Job, JobStatus};

use crate::error::QueueResult;
use crate::metrics;
use crate::store::{Expectation, JobMutation, JobStore};

#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Candidates fetched per scan
    pub batch_size: usize,
    /// Charged attempts allowed before a job is dead-lettered
    pub max_attempts: u32,
    /// A processing job silent for this long may be reclaimed
    pub stale_after: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            stale_after: Duration::from_secs(600),
        }
    }
}

pub struct Claimer {
    store: Arc<dyn JobStore>,
    worker_id: String,
    config: ClaimConfig,
}

impl Claimer {
    pub fn new(store: Arc<dyn JobStore>, worker_id: impl Into<String>, config: ClaimConfig) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Claim the highest-priority available job, if any.
    ///
    /// The returned job reflects the claim (`processing`, owned by this
    /// worker, `attempts` incremented).
    pub async fn claim_next(&self) -> QueueResult<Option<Job>> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let stale_before = Utc::now() - stale_after;

        let candidates = self
            .store
            .list_claimable(self.config.batch_size, stale_before)
            .await?;

        for candidate in candidates {
            let stale = candidate.status == JobStatus::Processing;
            let mut expected =
                Expectation::status(candidate.status).with_attempts(candidate.attempts);
            if stale {
                expected = expected.idle_since(stale_before);
                if !candidate.has_retry_budget(self.config.max_attempts) {
                    self.bury_abandoned(&candidate, expected).await?;
                    continue;
                }
            }

            let mutation = JobMutation::claim(self.worker_id.clone());
            if !self
                .store
                .transactional_update(&candidate.id, expected, mutation.clone())
                .await?
            {
                debug!(job_id = %candidate.id, worker_id = %self.worker_id, "Lost claim race");
                metrics::record_claim_conflict();
                continue;
            }

            let mut job = candidate;
            mutation.apply(&mut job);
            metrics::record_claim(stale);
            if stale {
                warn!(
                    job_id = %job.id,
                    worker_id = %self.worker_id,
                    attempts = job.attempts,
                    "Reclaimed stale job"
                );
            } else {
                info!(
                    job_id = %job.id,
                    worker_id = %self.worker_id,
                    attempts = job.attempts,
                    "Claimed job"
                );
            }
            return Ok(Some(job));
        }

        Ok(None)
    }

    async fn bury_abandoned(&self, job: &Job, expected: Expectation) -> QueueResult<()> {
        let error = format!(
            "abandoned by worker {} after {} attempts",
            job.worker_id.as_deref().unwrap_or("unknown"),
            job.attempts
        );
        if self
            .store
            .transactional_update(&job.id, expected, JobMutation::dead(error))
            .await?
        {
            warn!(job_id = %job.id, attempts = job.attempts, "Stale job out of retries, marked dead");
            metrics::record_transition("dead");
        }
        Ok(())
    }
}
