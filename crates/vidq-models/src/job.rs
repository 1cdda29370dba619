//! Job definitions for the durable queue.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ContentAnalysis, Fingerprint};

/// Priority assigned to submissions that do not ask for one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to claim it
    #[default]
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Analysis finished, result recorded
    Completed,
    /// Rejected by the analyzer as bad input
    Failed,
    /// Exhausted its retry budget
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input parameters of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct JobPayload {
    /// Source URL of the content to analyze
    pub url: String,
    /// Preferred output locale (e.g. "en", "pt-BR")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Free-form analyzer options
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            locale: None,
            options: serde_json::Map::new(),
        }
    }

    /// Set locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set a single option.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Content duration supplied by the caller, if any.
    pub fn duration_hint_secs(&self) -> Option<f64> {
        self.options
            .get("durationSeconds")
            .and_then(|v| v.as_f64())
            .filter(|d| d.is_finite() && *d >= 0.0)
    }
}

/// A unit of work in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    pub status: JobStatus,
    pub payload: JobPayload,
    /// Lower value is claimed first; ties broken by `created_at`
    pub priority: i32,
    /// Number of claims so far (only increases)
    pub attempts: u32,
    /// Claims given back because no analyzer capacity was available
    #[serde(default)]
    pub released_claims: u32,
    /// Worker currently or last holding the claim
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Last liveness signal from the claiming worker
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Present only when `status` is `completed`
    pub result: Option<ContentAnalysis>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(payload: JobPayload, fingerprint: Fingerprint) -> Self {
        Self {
            id: JobId::new(),
            fingerprint,
            status: JobStatus::Pending,
            payload,
            priority: DEFAULT_PRIORITY,
            attempts: 0,
            released_claims: 0,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            heartbeat_at: None,
            completed_at: None,
            last_error: None,
            result: None,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attempts that count against the retry budget.
    pub fn charged_attempts(&self) -> u32 {
        self.attempts.saturating_sub(self.released_claims)
    }

    /// Whether another claim fits within `max_attempts`.
    pub fn has_retry_budget(&self, max_attempts: u32) -> bool {
        self.charged_attempts() < max_attempts
    }

    /// Most recent moment the claiming worker was known to be alive.
    pub fn last_seen_alive(&self) -> Option<DateTime<Utc>> {
        self.heartbeat_at.or(self.started_at)
    }

    /// A processing job whose worker went quiet for at least `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match self.last_seen_alive() {
            Some(seen) => now - seen >= threshold,
            None => true,
        }
    }
}
