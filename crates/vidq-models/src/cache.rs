//! Fingerprint cache entries.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ContentAnalysis, Fingerprint, JobId};

/// Maps a fingerprint to a completed analysis for a bounded time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: ContentAnalysis,
    /// Job that produced the result, if it came from the queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry valid for `ttl` from now.
    pub fn new(fingerprint: Fingerprint, result: ContentAnalysis, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            result,
            source_job_id: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Record the producing job.
    pub fn with_source_job(mut self, job_id: JobId) -> Self {
        self.source_job_id = Some(job_id);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}
