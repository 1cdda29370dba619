//! Firestore-backed stores.
//!
//! Transactional updates are read-check-write cycles guarded by the document's
//! `updateTime` precondition. A concurrent write makes the precondition fail,
//! the document is re-read, and the expectation is checked again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vidq_firestore::{
    Filter, FirestoreClient, FirestoreError, Order, StructuredQuery, ToFirestoreValue,
};
use vidq_models::{CacheEntry, Fingerprint, Job, JobId, JobStatus};

use crate::cache::CacheStore;
use crate::document::{self, fields, MUTABLE_JOB_FIELDS};
use crate::error::{QueueError, QueueResult};
use crate::store::{Expectation, JobMutation, JobStore, QueueStats};

/// Precondition conflicts tolerated before an update reports a lost race.
const MAX_CONFLICT_RETRIES: u32 = 3;

pub struct FirestoreJobStore {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreJobStore {
    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    fn status_filter(status: JobStatus) -> Filter {
        Filter::field(fields::STATUS, "EQUAL", status.as_str().to_firestore_value())
    }

    fn finished_since(&self, status: JobStatus, since: DateTime<Utc>) -> StructuredQuery {
        StructuredQuery::collection(&self.collection).filter(Filter::and(vec![
            Self::status_filter(status),
            Filter::field(
                fields::COMPLETED_AT,
                "GREATER_THAN_OR_EQUAL",
                since.to_firestore_value(),
            ),
        ]))
    }

    fn parse_all(docs: Vec<vidq_firestore::Document>) -> Vec<Job> {
        docs.iter()
            .filter_map(|doc| match document::job_from_document(doc) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable job document");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for FirestoreJobStore {
    async fn insert(&self, job: Job) -> QueueResult<JobId> {
        let fields = document::job_to_fields(&job)?;
        match self
            .client
            .create_document(&self.collection, job.id.as_str(), fields)
            .await
        {
            Ok(_) => Ok(job.id),
            Err(FirestoreError::AlreadyExists(_)) => Err(QueueError::AlreadyExists(job.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &JobId) -> QueueResult<Job> {
        let doc = self
            .client
            .get_document(&self.collection, id.as_str())
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        document::job_from_document(&doc)
    }

    async fn list_claimable(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        let limit_i32 = i32::try_from(limit).unwrap_or(i32::MAX);

        // Requires composite indexes on (status, priority, created_at) and
        // (status, heartbeat_at).
        let pending = StructuredQuery::collection(&self.collection)
            .filter(Self::status_filter(JobStatus::Pending))
            .order_by(vec![
                Order::ascending(fields::PRIORITY),
                Order::ascending(fields::CREATED_AT),
            ])
            .limit(limit_i32);
        let stale = StructuredQuery::collection(&self.collection)
            .filter(Filter::and(vec![
                Self::status_filter(JobStatus::Processing),
                Filter::field(
                    fields::HEARTBEAT_AT,
                    "LESS_THAN",
                    stale_before.to_firestore_value(),
                ),
            ]))
            .order_by(vec![Order::ascending(fields::HEARTBEAT_AT)])
            .limit(limit_i32);

        let (pending, stale) = tokio::try_join!(
            self.client.run_query(pending),
            self.client.run_query(stale)
        )?;

        let mut jobs = Self::parse_all(pending);
        jobs.extend(Self::parse_all(stale));
        jobs.sort_by(|a, b| {
            (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn transactional_update(
        &self,
        id: &JobId,
        expected: Expectation,
        mutation: JobMutation,
    ) -> QueueResult<bool> {
        for conflict in 0..=MAX_CONFLICT_RETRIES {
            let doc = self
                .client
                .get_document(&self.collection, id.as_str())
                .await?
                .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
            let update_time = doc.update_time.clone().ok_or_else(|| {
                QueueError::corrupt(id.as_str(), "document has no updateTime")
            })?;

            let mut job = document::job_from_document(&doc)?;
            if !expected.matches(&job) {
                return Ok(false);
            }
            mutation.apply(&mut job);

            let fields = document::job_to_fields(&job)?;
            match self
                .client
                .update_document_with_precondition(
                    &self.collection,
                    id.as_str(),
                    fields,
                    MUTABLE_JOB_FIELDS,
                    &update_time,
                )
                .await
            {
                Ok(_) => return Ok(true),
                Err(e) if e.is_precondition_failed() => {
                    debug!(
                        job_id = %id,
                        mutation = mutation.kind(),
                        conflict = conflict + 1,
                        "Concurrent modification, re-reading job"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            job_id = %id,
            mutation = mutation.kind(),
            "Giving up after repeated write conflicts"
        );
        Ok(false)
    }

    async fn stats(&self, since: DateTime<Utc>) -> QueueResult<QueueStats> {
        let by_status =
            |status| StructuredQuery::collection(&self.collection).filter(Self::status_filter(status));
        let oldest = by_status(JobStatus::Pending)
            .order_by(vec![Order::ascending(fields::CREATED_AT)])
            .limit(1);

        let (pending, processing, dead_since, failed_since, oldest) = tokio::try_join!(
            self.client.count(by_status(JobStatus::Pending)),
            self.client.count(by_status(JobStatus::Processing)),
            self.client.count(self.finished_since(JobStatus::Dead, since)),
            self.client.count(self.finished_since(JobStatus::Failed, since)),
            self.client.run_query(oldest),
        )?;

        Ok(QueueStats {
            pending,
            processing,
            oldest_pending_created_at: Self::parse_all(oldest)
                .first()
                .map(|job| job.created_at),
            dead_since,
            failed_since,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
        self.client
            .run_query(StructuredQuery::collection(&self.collection).limit(1))
            .await?;
        Ok(())
    }
}

pub struct FirestoreCacheStore {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreCacheStore {
    pub fn new(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl CacheStore for FirestoreCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> QueueResult<Option<CacheEntry>> {
        let Some(doc) = self
            .client
            .get_document(&self.collection, fingerprint.as_str())
            .await?
        else {
            return Ok(None);
        };

        let entry = document::cache_entry_from_document(&doc)?;
        Ok((!entry.is_expired(Utc::now())).then_some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> QueueResult<()> {
        let fields = document::cache_entry_to_fields(&entry)?;
        self.client
            .set_document(&self.collection, entry.fingerprint.as_str(), fields)
            .await?;
        Ok(())
    }
}
