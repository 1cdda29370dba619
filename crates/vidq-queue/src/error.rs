//! Queue error types.

use thiserror::Error;
use vidq_firestore::FirestoreError;
use vidq_models::JobId;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the store may succeed if the call is repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Unavailable(_) => true,
            QueueError::Firestore(e) => e.is_retryable(),
            QueueError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::JobNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(QueueError::unavailable("down").is_retryable());
        assert!(QueueError::Firestore(FirestoreError::RateLimited(100)).is_retryable());
        assert!(!QueueError::JobNotFound(JobId::from("x")).is_retryable());
        assert!(QueueError::JobNotFound(JobId::from("x")).is_not_found());
        assert!(!QueueError::corrupt("x", "bad status").is_retryable());
    }
}
