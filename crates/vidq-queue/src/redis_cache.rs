//! Redis-backed result cache.
//!
//! Entries are stored as JSON under `<prefix><fingerprint>` with a Redis TTL
//! matching the entry's expiry, so Redis evicts them on its own.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::debug;

use vidq_models::{CacheEntry, Fingerprint};

use crate::cache::CacheStore;
use crate::error::QueueResult;

pub const DEFAULT_KEY_PREFIX: &str = "vidq:cache:";

pub struct RedisCacheStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCacheStore {
    pub fn new(redis_url: &str, key_prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    pub fn key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> QueueResult<Option<CacheEntry>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.key(fingerprint)).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw)?;
        Ok((!entry.is_expired(Utc::now())).then_some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> QueueResult<()> {
        let ttl_secs = entry.remaining_ttl(Utc::now()).num_seconds();
        if ttl_secs <= 0 {
            debug!(fingerprint = %entry.fingerprint, "Skipping already expired cache entry");
            return Ok(());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&entry)?;
        conn.set_ex::<_, _, ()>(self.key(&entry.fingerprint), payload, ttl_secs as u64)
            .await?;
        Ok(())
    }
}
