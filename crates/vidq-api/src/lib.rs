//! Axum HTTP API for job submission, status polling and queue health.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::{ApiConfig, SubmissionConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{Submission, SubmissionService, SubmitOutcome};
pub use state::AppState;
