//! Caller-facing view of a job.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ContentAnalysis, Job, JobId, JobStatus};

/// What the status boundary exposes about a job.
///
/// Worker identity and retry counters stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ContentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let result = match job.status {
            JobStatus::Completed => job.result,
            _ => None,
        };
        let last_error = match job.status {
            JobStatus::Failed | JobStatus::Dead => job.last_error,
            _ => None,
        };

        Self {
            job_id: job.id,
            status: job.status,
            result,
            last_error,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}
