//! Worker loop.
//!
//! One loop holds at most one job at a time and moves through
//! `Idle -> Scanning -> Claimed -> Analyzing -> Recording -> Idle`. Every
//! write after the claim is fenced on the claim generation, so a loop whose
//! job was reclaimed after going stale cannot overwrite the new owner.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use vidq_analyzer::{AnalyzerPool, PoolError};
use vidq_models::{CacheEntry, ContentAnalysis, Job, JobId};
use vidq_queue::{CacheStore, ClaimConfig, Claimer, Expectation, JobMutation, JobStore, QueueError};

use crate::backoff::IdleBackoff;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Scanning,
    Claimed,
    Analyzing,
    Recording,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Scanning => "scanning",
            WorkerState::Claimed => "claimed",
            WorkerState::Analyzing => "analyzing",
            WorkerState::Recording => "recording",
        };
        f.write_str(name)
    }
}

/// What a single pass through the state machine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was claimable.
    Empty,
    Completed(JobId),
    /// Transient failure with budget left; back to `pending`.
    Requeued(JobId),
    /// Input rejected by the analyzer.
    Failed(JobId),
    /// Retry budget exhausted.
    Dead(JobId),
    /// No analyzer capacity, or shutdown before analysis; back to `pending`
    /// without charging an attempt.
    Released(JobId),
    /// Another worker took the job over before the outcome was written.
    ClaimLost(JobId),
}

impl CycleOutcome {
    pub fn found_work(&self) -> bool {
        !matches!(self, CycleOutcome::Empty)
    }

    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Empty => "empty",
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Requeued(_) => "requeued",
            CycleOutcome::Failed(_) => "failed",
            CycleOutcome::Dead(_) => "dead",
            CycleOutcome::Released(_) => "released",
            CycleOutcome::ClaimLost(_) => "claim_lost",
        }
    }
}

/// Collaborators shared by every loop in a process.
#[derive(Clone)]
pub struct WorkerDeps {
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn CacheStore>,
    pub pool: AnalyzerPool,
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Aborts the heartbeat task when the job step ends, however it ends.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct WorkerLoop {
    worker_id: String,
    claimer: Claimer,
    deps: WorkerDeps,
    config: WorkerConfig,
    backoff: IdleBackoff,
    failures: FailureTracker,
    state: watch::Sender<WorkerState>,
}

impl WorkerLoop {
    pub fn new(worker_id: impl Into<String>, deps: WorkerDeps, config: WorkerConfig) -> Self {
        let worker_id = worker_id.into();
        let claim_config: ClaimConfig = config.claim_config();
        let (state, _) = watch::channel(WorkerState::Idle);

        Self {
            claimer: Claimer::new(Arc::clone(&deps.jobs), worker_id.clone(), claim_config),
            backoff: config.idle_backoff(),
            failures: FailureTracker::new(3),
            worker_id,
            deps,
            config,
            state,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Poll until shutdown. A job already in `Analyzing` is finished and
    /// recorded before the loop exits; no new claim starts after the signal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Worker loop started");
        metrics::loop_started();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once(&shutdown).await {
                Ok(outcome) => {
                    self.failures.record_success();
                    if outcome.found_work() {
                        self.backoff.on_work()
                    } else {
                        self.backoff.on_empty()
                    }
                }
                Err(e) => {
                    metrics::record_loop_error();
                    if self.failures.record_failure() {
                        warn!(
                            worker_id = %self.worker_id,
                            error = %e,
                            retryable = e.is_retryable(),
                            "Worker cycle failed, backing off"
                        );
                    }
                    self.backoff.on_empty()
                }
            };
            self.set_state(WorkerState::Idle);

            if delay.is_zero() {
                continue;
            }
            debug!(worker_id = %self.worker_id, ?delay, "Idle");
            tokio::select! {
                _ = stopped(&mut shutdown) => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        metrics::loop_stopped();
        info!(worker_id = %self.worker_id, "Worker loop stopped");
    }

    /// One pass: scan, and if a job was claimed, analyze and record it.
    ///
    /// Store failures come back as errors; analyzer failures are recorded on
    /// the job and never escape.
    pub async fn run_once(&mut self, shutdown: &watch::Receiver<bool>) -> WorkerResult<CycleOutcome> {
        self.set_state(WorkerState::Scanning);
        let Some(job) = self.claimer.claim_next().await? else {
            return Ok(CycleOutcome::Empty);
        };

        self.set_state(WorkerState::Claimed);
        let logger = JobLogger::new(&job.id, &self.worker_id, "analyze").with_attempt(job.attempts);
        let span = logger.create_span();
        self.process(job, logger, shutdown.clone()).instrument(span).await
    }

    async fn process(
        &self,
        job: Job,
        logger: JobLogger,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<CycleOutcome> {
        logger.log_start(&job.payload.url);
        let started = Instant::now();

        let lease = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => Err("worker shutting down before analysis".to_string()),
            acquired = self.deps.pool.acquire_timeout(self.config.acquire_timeout) => {
                acquired.map_err(|e| e.to_string())
            }
        };
        let lease = match lease {
            Ok(lease) => lease,
            Err(reason) => {
                logger.log_warning(&format!("releasing claim: {}", reason));
                let outcome = self
                    .record(&job, JobMutation::release(reason), &logger)
                    .await?;
                metrics::record_job_duration(outcome.label(), started.elapsed());
                return Ok(outcome);
            }
        };

        self.set_state(WorkerState::Analyzing);
        let region = lease.region().to_string();
        let result = {
            let _heartbeat = self.spawn_heartbeat(&job);
            self.deps.pool.run(lease, &job.payload).await
        };

        self.set_state(WorkerState::Recording);
        let mutation = self.outcome_mutation(&job, &result, &logger, &region);
        let outcome = self.record(&job, mutation, &logger).await?;

        if let (CycleOutcome::Completed(_), Ok(analysis)) = (&outcome, result) {
            self.populate_cache(&job, analysis).await;
        }
        metrics::record_job_duration(outcome.label(), started.elapsed());
        Ok(outcome)
    }

    fn outcome_mutation(
        &self,
        job: &Job,
        result: &Result<ContentAnalysis, PoolError>,
        logger: &JobLogger,
        region: &str,
    ) -> JobMutation {
        match result {
            Ok(analysis) => {
                logger.log_progress(&format!(
                    "analysis done in {} with {} highlights",
                    analysis.analyzer_region.as_deref().unwrap_or(region),
                    analysis.highlights.len()
                ));
                JobMutation::complete(analysis.clone())
            }
            Err(e) if !e.is_retryable() => {
                logger.log_error(&format!("input rejected: {}", e));
                JobMutation::fail(e.to_string())
            }
            Err(e) if job.has_retry_budget(self.config.max_attempts) => {
                logger.log_warning(&format!(
                    "attempt {}/{} failed, requeueing: {}",
                    job.charged_attempts(),
                    self.config.max_attempts,
                    e
                ));
                JobMutation::requeue(e.to_string())
            }
            Err(e) => {
                logger.log_error(&format!(
                    "giving up after {} attempts: {}",
                    job.charged_attempts(),
                    e
                ));
                JobMutation::dead(format!("{} (after {} attempts)", e, job.charged_attempts()))
            }
        }
    }

    /// Write a transition fenced on this worker's claim.
    async fn record(
        &self,
        job: &Job,
        mutation: JobMutation,
        logger: &JobLogger,
    ) -> WorkerResult<CycleOutcome> {
        let fence = Expectation::claimed(job.attempts);
        let retry = RetryConfig::new(format!("record_{}", mutation.kind()));

        let committed = retry_async(&retry, QueueError::is_retryable, || {
            self.deps
                .jobs
                .transactional_update(&job.id, fence.clone(), mutation.clone())
        })
        .await
        .map_err(|e| {
            logger.log_error(&format!(
                "could not record {}; job will be reclaimed when stale: {}",
                mutation.kind(),
                e
            ));
            e
        })?;

        let id = job.id.clone();
        if !committed {
            logger.log_warning("claim was taken over, outcome discarded");
            metrics::record_claim_lost();
            return Ok(CycleOutcome::ClaimLost(id));
        }

        vidq_queue::metrics::record_transition(mutation.kind());
        let outcome = match mutation {
            JobMutation::Complete { .. } => CycleOutcome::Completed(id),
            JobMutation::Requeue { .. } => CycleOutcome::Requeued(id),
            JobMutation::Fail { .. } => CycleOutcome::Failed(id),
            JobMutation::Dead { .. } => CycleOutcome::Dead(id),
            _ => CycleOutcome::Released(id),
        };
        logger.log_completion(outcome.label());
        Ok(outcome)
    }

    async fn populate_cache(&self, job: &Job, analysis: ContentAnalysis) {
        let ttl = chrono::Duration::from_std(self.config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let entry = CacheEntry::new(job.fingerprint.clone(), analysis, ttl).with_source_job(job.id.clone());

        if let Err(e) = self.deps.cache.put(entry).await {
            warn!(job_id = %job.id, error = %e, "Failed to cache analysis result");
        }
    }

    fn spawn_heartbeat(&self, job: &Job) -> HeartbeatGuard {
        let store = Arc::clone(&self.deps.jobs);
        let id = job.id.clone();
        let fence = Expectation::claimed(job.attempts);
        let every = self.config.heartbeat_interval.max(Duration::from_millis(10));

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            let mut failures = FailureTracker::new(3);
            loop {
                ticker.tick().await;
                match store
                    .transactional_update(&id, fence.clone(), JobMutation::heartbeat())
                    .await
                {
                    Ok(true) => failures.record_success(),
                    Ok(false) => {
                        warn!(job_id = %id, "Claim no longer held, stopping heartbeat");
                        break;
                    }
                    Err(e) => {
                        metrics::record_heartbeat_failure();
                        if failures.record_failure() {
                            error!(job_id = %id, error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        }))
    }
}
