//! Structured job logging.

use tracing::{error, info, warn, Span};

use vidq_models::JobId;

/// Logs job lifecycle events with the job, claim attempt, worker and
/// operation attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    attempt: u32,
    worker_id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker_id: &str, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            attempt: 0,
            worker_id: worker_id.to_string(),
            operation,
        }
    }

    /// Tag lines with the claim generation that produced them.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span to instrument the job's futures with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            attempt = self.attempt,
            worker_id = %self.worker_id,
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::from("job-123");
        let logger = JobLogger::new(&job_id, "worker-a", "analyze").with_attempt(2);

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.worker_id(), "worker-a");
        assert_eq!(logger.attempt(), 2);
    }
}
