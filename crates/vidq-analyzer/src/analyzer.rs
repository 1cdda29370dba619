//! External content-analyzer contract.

use async_trait::async_trait;

use vidq_models::{ContentAnalysis, JobPayload};

use crate::error::AnalyzerResult;

/// Turns a source URL plus options into structured content data.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis>;

    /// Model or backend name reported in results.
    fn name(&self) -> &str {
        "analyzer"
    }
}
