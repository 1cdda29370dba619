//! Submission service.
//!
//! A submission is answered from the fingerprint cache when possible. On a
//! miss, cheap work runs inline on the analyzer pool under a hard timeout;
//! everything else, including inline attempts that time out or fail
//! transiently, becomes a `pending` job.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use vidq_analyzer::{AnalyzerPool, PoolError};
use vidq_models::{CacheEntry, ContentAnalysis, Fingerprint, Job, JobId, JobPayload, JobView};
use vidq_queue::{CacheStore, JobStore};

use crate::config::SubmissionConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{is_valid_job_id, validate_source_url};

/// Validated input of a submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub payload: JobPayload,
    pub priority: Option<i32>,
}

/// How a submission was answered.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Served from the fingerprint cache.
    Cached(ContentAnalysis),
    /// Processed inline within the request.
    Inline(ContentAnalysis),
    Queued(JobId),
}

impl SubmitOutcome {
    fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Cached(_) => "cached",
            SubmitOutcome::Inline(_) => "inline",
            SubmitOutcome::Queued(_) => "queued",
        }
    }
}

#[derive(Clone)]
pub struct SubmissionService {
    jobs: Arc<dyn JobStore>,
    cache: Arc<dyn CacheStore>,
    pool: Option<AnalyzerPool>,
    config: SubmissionConfig,
}

impl SubmissionService {
    /// `pool` is optional: without one every cache miss is queued.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn CacheStore>,
        pool: Option<AnalyzerPool>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            jobs,
            cache,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub async fn submit(&self, mut submission: Submission) -> ApiResult<SubmitOutcome> {
        submission.payload.url =
            validate_source_url(&submission.payload.url).map_err(ApiError::Validation)?;
        let fingerprint = Fingerprint::derive(&submission.payload)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let outcome = self.answer(submission, fingerprint).await?;
        metrics::record_submission(outcome.label());
        Ok(outcome)
    }

    async fn answer(&self, submission: Submission, fingerprint: Fingerprint) -> ApiResult<SubmitOutcome> {
        match self.cache.get(&fingerprint).await {
            Ok(Some(entry)) => {
                debug!(fingerprint = %fingerprint, "Cache hit");
                return Ok(SubmitOutcome::Cached(entry.result));
            }
            Ok(None) => {}
            // A cache outage degrades to a miss; the store decides availability.
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Cache lookup failed"),
        }

        if let Some(analysis) = self.try_inline(&submission.payload, &fingerprint).await? {
            return Ok(SubmitOutcome::Inline(analysis));
        }

        let priority = submission.priority.unwrap_or(self.config.default_priority);
        let job = Job::new(submission.payload, fingerprint).with_priority(priority);
        let id = self.jobs.insert(job).await?;
        vidq_queue::metrics::record_enqueued();
        info!(job_id = %id, priority, "Job queued");
        Ok(SubmitOutcome::Queued(id))
    }

    /// Estimated processing time, when the caller told us the content length.
    ///
    /// A hint too large to represent is treated as unknown, which queues.
    pub fn estimate(&self, payload: &JobPayload) -> Option<Duration> {
        payload
            .duration_hint_secs()
            .and_then(|secs| Duration::try_from_secs_f64(secs * self.config.cost_factor).ok())
    }

    /// Run the analysis inline when it is cheap and capacity is free right now.
    ///
    /// `Ok(None)` means the job should be queued instead.
    async fn try_inline(
        &self,
        payload: &JobPayload,
        fingerprint: &Fingerprint,
    ) -> ApiResult<Option<ContentAnalysis>> {
        if !self.config.inline_enabled {
            return Ok(None);
        }
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        match self.estimate(payload) {
            Some(estimate) if estimate <= self.config.inline_max_estimate => {}
            _ => return Ok(None),
        }
        let Some(lease) = pool.try_acquire() else {
            debug!("No free analyzer capacity, queueing");
            return Ok(None);
        };

        let result = tokio::time::timeout(self.config.inline_timeout, pool.run(lease, payload)).await;
        match result {
            Ok(Ok(analysis)) => {
                self.populate_cache(fingerprint, &analysis).await;
                info!(url = %payload.url, "Processed inline");
                Ok(Some(analysis))
            }
            Ok(Err(PoolError::Analyzer(e))) if e.is_terminal() => {
                Err(ApiError::InvalidInput(e.to_string()))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Inline analysis failed, queueing instead");
                Ok(None)
            }
            Err(_) => {
                warn!(timeout = ?self.config.inline_timeout, "Inline analysis timed out, queueing instead");
                Ok(None)
            }
        }
    }

    async fn populate_cache(&self, fingerprint: &Fingerprint, analysis: &ContentAnalysis) {
        let ttl = chrono::Duration::from_std(self.config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let entry = CacheEntry::new(fingerprint.clone(), analysis.clone(), ttl);
        if let Err(e) = self.cache.put(entry).await {
            warn!(fingerprint = %fingerprint, error = %e, "Failed to cache inline result");
        }
    }

    pub async fn status(&self, job_id: &str) -> ApiResult<JobView> {
        if !is_valid_job_id(job_id) {
            return Err(ApiError::not_found("Job not found"));
        }
        let job = self.jobs.get(&JobId::from(job_id)).await?;
        Ok(JobView::from(job))
    }

    pub async fn ping(&self) -> ApiResult<()> {
        self.jobs.ping().await?;
        Ok(())
    }
}
