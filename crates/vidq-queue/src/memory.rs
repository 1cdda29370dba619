//! In-memory store implementations.
//!
//! These honor the same transactional contract as the Firestore backend and
//! back local development (`QUEUE_BACKEND=memory`) as well as tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use vidq_models::{CacheEntry, Fingerprint, Job, JobId, JobStatus};

use crate::cache::CacheStore;
use crate::error::{QueueError, QueueResult};
use crate::store::{Expectation, JobMutation, JobStore, QueueStats};

/// Job store held in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all stored jobs.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.lock().await.values().cloned().collect()
    }

    /// Overwrite a stored job. Used to stage states in tests.
    pub async fn put_raw(&self, job: Job) {
        self.jobs.lock().await.insert(job.id.clone(), job);
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::unavailable("memory store marked unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> QueueResult<JobId> {
        self.check_available()?;
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Job> {
        self.check_available()?;
        self.jobs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))
    }

    async fn list_claimable(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        self.check_available()?;
        let jobs = self.jobs.lock().await;
        let mut claimable: Vec<Job> = jobs
            .values()
            .filter(|job| match job.status {
                JobStatus::Pending => true,
                JobStatus::Processing => job
                    .last_seen_alive()
                    .map_or(true, |seen| seen < stale_before),
                _ => false,
            })
            .cloned()
            .collect();

        claimable.sort_by(|a, b| {
            (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
        });
        claimable.truncate(limit);
        Ok(claimable)
    }

    async fn transactional_update(
        &self,
        id: &JobId,
        expected: Expectation,
        mutation: JobMutation,
    ) -> QueueResult<bool> {
        self.check_available()?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;

        if !expected.matches(job) {
            return Ok(false);
        }
        mutation.apply(job);
        Ok(true)
    }

    async fn stats(&self, since: DateTime<Utc>) -> QueueResult<QueueStats> {
        self.check_available()?;
        let jobs = self.jobs.lock().await;
        let mut stats = QueueStats::default();

        for job in jobs.values() {
            let recent = job.completed_at.map_or(false, |at| at >= since);
            match job.status {
                JobStatus::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending_created_at = Some(
                        stats
                            .oldest_pending_created_at
                            .map_or(job.created_at, |oldest| oldest.min(job.created_at)),
                    );
                }
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Dead if recent => stats.dead_since += 1,
                JobStatus::Failed if recent => stats.failed_since += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check_available()
    }
}

/// Result cache held in process memory.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> QueueResult<Option<CacheEntry>> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .await
            .get(fingerprint)
            .filter(|entry| !entry.is_expired(now))
            .cloned())
    }

    async fn put(&self, entry: CacheEntry) -> QueueResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use vidq_models::{ContentAnalysis, JobPayload};

    fn job(priority: i32, age_secs: i64) -> Job {
        let mut job = Job::new(
            JobPayload::new("https://example.com/v.mp4"),
            Fingerprint::from_string("fp"),
        )
        .with_priority(priority);
        job.created_at = Utc::now() - Duration::seconds(age_secs);
        job
    }

    #[tokio::test]
    async fn test_list_claimable_orders_by_priority_then_age() {
        let store = MemoryJobStore::new();
        let low = store.insert(job(200, 100)).await.unwrap();
        let newer = store.insert(job(10, 5)).await.unwrap();
        let older = store.insert(job(10, 50)).await.unwrap();

        let ids: Vec<JobId> = store
            .list_claimable(10, Utc::now() - Duration::minutes(10))
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![older, newer, low]);
    }

    #[tokio::test]
    async fn test_list_claimable_includes_only_stale_processing() {
        let store = MemoryJobStore::new();
        let mut stale = job(100, 60);
        JobMutation::claim("w1").apply(&mut stale);
        stale.heartbeat_at = Some(Utc::now() - Duration::minutes(30));
        let mut live = job(100, 60);
        JobMutation::claim("w2").apply(&mut live);
        let mut done = job(100, 60);
        done.status = JobStatus::Completed;

        let stale_id = stale.id.clone();
        store.put_raw(stale).await;
        store.put_raw(live).await;
        store.put_raw(done).await;

        let claimable = store
            .list_claimable(10, Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].id, stale_id);
    }

    #[tokio::test]
    async fn test_completed_job_rejects_second_completion() {
        let store = MemoryJobStore::new();
        let id = store.insert(job(100, 0)).await.unwrap();
        assert!(store
            .transactional_update(&id, JobStatus::Pending.into(), JobMutation::claim("w"))
            .await
            .unwrap());
        let result = ContentAnalysis::new("https://example.com/v.mp4");
        assert!(store
            .transactional_update(&id, Expectation::claimed(1), JobMutation::complete(result.clone()))
            .await
            .unwrap());

        let mut other = result.clone();
        other.summary = Some("overwritten".into());
        assert!(!store
            .transactional_update(&id, Expectation::claimed(1), JobMutation::complete(other))
            .await
            .unwrap());
        assert_eq!(store.get(&id).await.unwrap().result, Some(result));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let id = store.insert(job(100, 0)).await.unwrap();

        let attempts = (0..16).map(|n| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .transactional_update(
                        &id,
                        JobStatus::Pending.into(),
                        JobMutation::claim(format!("worker-{}", n)),
                    )
                    .await
                    .unwrap()
            })
        });
        let wins = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(wins, 1);
        assert_eq!(store.get(&id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.get(&JobId::from("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stats_counts_recent_terminal_jobs() {
        let store = MemoryJobStore::new();
        let oldest = job(100, 300);
        let oldest_created = oldest.created_at;
        store.insert(oldest).await.unwrap();
        store.insert(job(100, 10)).await.unwrap();

        let mut dead = job(100, 500);
        JobMutation::dead("gave up").apply(&mut dead);
        store.put_raw(dead).await;
        let mut old_failure = job(100, 500);
        JobMutation::fail("bad input").apply(&mut old_failure);
        old_failure.completed_at = Some(Utc::now() - Duration::hours(3));
        store.put_raw(old_failure).await;

        let stats = store.stats(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.oldest_pending_created_at, Some(oldest_created));
        assert_eq!(stats.dead_since, 1);
        assert_eq!(stats.failed_since, 0);
    }

    #[tokio::test]
    async fn test_outage_surfaces_as_retryable() {
        let store = MemoryJobStore::new();
        store.set_unavailable(true);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_retryable());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_cache_hides_expired_entries() {
        let cache = MemoryCacheStore::new();
        let fp = Fingerprint::from_string("abc");
        let result = ContentAnalysis::new("https://example.com");
        cache
            .put(CacheEntry::new(fp.clone(), result.clone(), Duration::seconds(-1)))
            .await
            .unwrap();
        assert!(cache.get(&fp).await.unwrap().is_none());

        cache
            .put(CacheEntry::new(fp.clone(), result, Duration::hours(1)))
            .await
            .unwrap();
        assert!(cache.get(&fp).await.unwrap().is_some());
    }
}
