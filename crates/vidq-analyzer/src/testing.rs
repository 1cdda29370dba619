//! Deterministic analyzers for tests and local runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use vidq_models::{ContentAnalysis, Highlight, JobPayload};

use crate::analyzer::Analyzer;
use crate::error::{AnalyzerError, AnalyzerResult};

/// Analyzer that replays queued outcomes, then falls back to a fixed one.
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<AnalyzerResult<ContentAnalysis>>>,
    fallback: Option<AnalyzerError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    /// Succeeds with a canned analysis of the submitted URL.
    pub fn succeeding() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call with `error`.
    pub fn failing(error: AnalyzerError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::succeeding()
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue an outcome for the next unanswered call.
    pub fn push(&self, outcome: AnalyzerResult<ContentAnalysis>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The analysis `succeeding()` returns for `url`.
    pub fn canned(url: &str) -> ContentAnalysis {
        let mut analysis = ContentAnalysis::new(url);
        analysis.video_title = Some("Scripted video".to_string());
        analysis.summary = Some("Scripted summary".to_string());
        analysis.with_highlight(Highlight::new(1, "Opening", "00:00:05", "00:00:35"))
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(outcome) => outcome,
            None => match &self.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(Self::canned(&payload.url)),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
