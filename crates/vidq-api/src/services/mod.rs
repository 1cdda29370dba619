//! Business logic behind the HTTP handlers.

pub mod submission;

pub use submission::{SubmissionService, Submission, SubmitOutcome};
