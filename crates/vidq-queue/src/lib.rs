//! Durable job queue for video analysis.
//!
//! This crate provides:
//! - The `JobStore` / `CacheStore` contracts with Firestore, Redis and in-memory backends
//! - The job claim protocol (`Claimer`), including stale-claim recovery
//! - The queue health monitor

pub mod cache;
pub mod claim;
pub mod config;
pub mod document;
pub mod error;
pub mod firestore;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod redis_cache;
pub mod store;

pub use cache::CacheStore;
pub use claim::{ClaimConfig, Claimer};
pub use config::{CacheBackend, QueueConfig, StoreBackend, Stores};
pub use error::{QueueError, QueueResult};
pub use firestore::{FirestoreCacheStore, FirestoreJobStore};
pub use health::{HealthMonitorConfig, QueueHealthMonitor, QueueHealthSnapshot};
pub use memory::{MemoryCacheStore, MemoryJobStore};
pub use redis_cache::RedisCacheStore;
pub use store::{Expectation, JobMutation, JobStore, QueueStats};
