//! Analyzer and pool error types.

use std::time::Duration;

use thiserror::Error;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
pub type PoolResult<T> = Result<T, PoolError>;

/// Typed failure raised by a content analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),
}

impl AnalyzerError {
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Transient failures worth another attempt, possibly elsewhere.
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }

    /// The input itself was rejected; retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalyzerError::InvalidInput(_))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzerError::RateLimited(_) => "rate_limited",
            AnalyzerError::InvalidInput(_) => "invalid_input",
            AnalyzerError::Unavailable(_) => "unavailable",
            AnalyzerError::Timeout(_) => "timeout",
        }
    }
}

/// Failure of a pool operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No healthy handle freed up within the bounded wait.
    #[error("No analyzer capacity within {0:?}")]
    Exhausted(Duration),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

impl PoolError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::Exhausted(_) => true,
            PoolError::Analyzer(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_input_is_terminal() {
        assert!(AnalyzerError::invalid_input("unsupported").is_terminal());
        assert!(AnalyzerError::rate_limited("quota").is_retryable());
        assert!(AnalyzerError::unavailable("503").is_retryable());
        assert!(AnalyzerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(PoolError::Exhausted(Duration::from_secs(1)).is_retryable());
        assert!(!PoolError::from(AnalyzerError::invalid_input("x")).is_retryable());
    }
}
