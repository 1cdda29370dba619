//! Firestore REST API client.
//!
//! This crate provides:
//! - Service account authentication via gcp_auth with token caching
//! - Document CRUD with `updateTime` preconditions (optimistic concurrency)
//! - Structured and aggregation (count) queries
//! - Retry with exponential backoff and jitter
//! - Request metrics

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use token_cache::TokenCache;
pub use types::{
    CollectionSelector, CompositeFilter, Document, FieldFilter, FieldReference, Filter,
    FromFirestoreValue, Order, StructuredQuery, ToFirestoreValue, Value,
};
