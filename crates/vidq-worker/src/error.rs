//! Worker error types.

use thiserror::Error;

use vidq_analyzer::PoolError;
use vidq_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Analyzer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Analyzer configuration error: {0}")]
    AnalyzerConfig(#[from] vidq_analyzer::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the loop should back off and try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Pool(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            WorkerError::ConfigError(_) | WorkerError::AnalyzerConfig(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_outage_is_retryable() {
        let err: WorkerError = QueueError::unavailable("down").into();
        assert!(err.is_retryable());
        assert!(!WorkerError::config_error("bad").is_retryable());
    }
}
