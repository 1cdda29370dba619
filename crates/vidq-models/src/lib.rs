//! Shared data models for the vidq analysis pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job status and the public job view
//! - Analyzer output (content analysis and highlights)
//! - Cache entries keyed by fingerprint
//! - Fingerprint derivation from submitted URLs

pub mod analysis;
pub mod cache;
pub mod fingerprint;
pub mod job;
pub mod view;

// Re-export common types
pub use analysis::{ContentAnalysis, Highlight};
pub use cache::CacheEntry;
pub use fingerprint::{canonical_url, extract_youtube_id, Fingerprint, FingerprintError};
pub use job::{Job, JobId, JobPayload, JobStatus, DEFAULT_PRIORITY};
pub use view::JobView;
