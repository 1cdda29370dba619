//! Fingerprint-keyed result cache.

use async_trait::async_trait;

use vidq_models::{CacheEntry, Fingerprint};

use crate::error::QueueResult;

/// Storage for completed analysis results, keyed by fingerprint.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries read as a miss.
    async fn get(&self, fingerprint: &Fingerprint) -> QueueResult<Option<CacheEntry>>;

    /// Insert or replace the entry for its fingerprint.
    async fn put(&self, entry: CacheEntry) -> QueueResult<()>;
}
