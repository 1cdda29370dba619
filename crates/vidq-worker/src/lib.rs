//! Analysis worker.
//!
//! This crate provides:
//! - The worker loop state machine (claim, analyze, record)
//! - Idle backoff for polling an empty queue
//! - Claim heartbeats and fenced outcome recording
//! - Graceful shutdown

pub mod backoff;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod worker;

pub use backoff::IdleBackoff;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use worker::{CycleOutcome, WorkerDeps, WorkerLoop, WorkerState};
