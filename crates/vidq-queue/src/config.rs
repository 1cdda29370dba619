//! Store backend selection.

use std::sync::Arc;

use tracing::info;
use vidq_firestore::FirestoreClient;

use crate::cache::CacheStore;
use crate::error::{QueueError, QueueResult};
use crate::firestore::{FirestoreCacheStore, FirestoreJobStore};
use crate::memory::{MemoryCacheStore, MemoryJobStore};
use crate::redis_cache::{RedisCacheStore, DEFAULT_KEY_PREFIX};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Firestore,
    Redis,
    Memory,
}

impl StoreBackend {
    fn parse(s: &str) -> QueueResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            other => Err(QueueError::Config(format!("unknown QUEUE_BACKEND `{}`", other))),
        }
    }
}

impl CacheBackend {
    fn parse(s: &str) -> QueueResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(QueueError::Config(format!("unknown CACHE_BACKEND `{}`", other))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: StoreBackend,
    pub jobs_collection: String,
    pub cache_backend: CacheBackend,
    pub cache_collection: String,
    pub redis_url: String,
    pub cache_key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Firestore,
            jobs_collection: "analysis_jobs".to_string(),
            cache_backend: CacheBackend::Firestore,
            cache_collection: "analysis_cache".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            cache_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            backend: match std::env::var("QUEUE_BACKEND") {
                Ok(v) => StoreBackend::parse(&v)?,
                Err(_) => defaults.backend,
            },
            jobs_collection: std::env::var("QUEUE_JOBS_COLLECTION")
                .unwrap_or(defaults.jobs_collection),
            cache_backend: match std::env::var("CACHE_BACKEND") {
                Ok(v) => CacheBackend::parse(&v)?,
                Err(_) => defaults.cache_backend,
            },
            cache_collection: std::env::var("CACHE_COLLECTION")
                .unwrap_or(defaults.cache_collection),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            cache_key_prefix: std::env::var("CACHE_KEY_PREFIX")
                .unwrap_or(defaults.cache_key_prefix),
        })
    }

    /// In-process stores, for local runs and tests.
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            cache_backend: CacheBackend::Memory,
            ..Self::default()
        }
    }

    /// Connect the configured backends.
    pub async fn open(&self) -> QueueResult<Stores> {
        let needs_firestore = self.backend == StoreBackend::Firestore
            || self.cache_backend == CacheBackend::Firestore;
        let firestore = if needs_firestore {
            Some(FirestoreClient::from_env().await?)
        } else {
            None
        };

        let jobs: Arc<dyn JobStore> = match (self.backend, &firestore) {
            (StoreBackend::Firestore, Some(client)) => Arc::new(FirestoreJobStore::new(
                client.clone(),
                &self.jobs_collection,
            )),
            _ => Arc::new(MemoryJobStore::new()),
        };

        let cache: Arc<dyn CacheStore> = match (self.cache_backend, &firestore) {
            (CacheBackend::Firestore, Some(client)) => Arc::new(FirestoreCacheStore::new(
                client.clone(),
                &self.cache_collection,
            )),
            (CacheBackend::Redis, _) => Arc::new(RedisCacheStore::new(
                &self.redis_url,
                &self.cache_key_prefix,
            )?),
            _ => Arc::new(MemoryCacheStore::new()),
        };

        info!(
            backend = ?self.backend,
            cache_backend = ?self.cache_backend,
            jobs_collection = %self.jobs_collection,
            "Opened queue stores"
        );
        Ok(Stores { jobs, cache })
    }
}

/// Connected job and cache stores.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn CacheStore>,
}
