//! Mapping between jobs/cache entries and Firestore documents.
//!
//! Scalar fields are stored natively so they can be filtered and ordered on.
//! The payload and analysis result are stored as JSON strings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use vidq_firestore::{Document, FromFirestoreValue, ToFirestoreValue, Value};
use vidq_models::{CacheEntry, ContentAnalysis, Fingerprint, Job, JobId, JobPayload, JobStatus};

use crate::error::{QueueError, QueueResult};

pub mod fields {
    pub const FINGERPRINT: &str = "fingerprint";
    pub const STATUS: &str = "status";
    pub const PAYLOAD: &str = "payload";
    pub const PRIORITY: &str = "priority";
    pub const ATTEMPTS: &str = "attempts";
    pub const RELEASED_CLAIMS: &str = "released_claims";
    pub const WORKER_ID: &str = "worker_id";
    pub const CREATED_AT: &str = "created_at";
    pub const STARTED_AT: &str = "started_at";
    pub const HEARTBEAT_AT: &str = "heartbeat_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const LAST_ERROR: &str = "last_error";
    pub const RESULT: &str = "result";

    pub const SOURCE_JOB_ID: &str = "source_job_id";
    pub const EXPIRES_AT: &str = "expires_at";
}

/// Fields a transactional update may rewrite.
pub const MUTABLE_JOB_FIELDS: &[&str] = &[
    fields::STATUS,
    fields::ATTEMPTS,
    fields::RELEASED_CLAIMS,
    fields::WORKER_ID,
    fields::STARTED_AT,
    fields::HEARTBEAT_AT,
    fields::COMPLETED_AT,
    fields::LAST_ERROR,
    fields::RESULT,
];

pub fn job_to_fields(job: &Job) -> QueueResult<HashMap<String, Value>> {
    let result = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let mut map = HashMap::new();
    map.insert(fields::FINGERPRINT.into(), job.fingerprint.as_str().to_firestore_value());
    map.insert(fields::STATUS.into(), job.status.as_str().to_firestore_value());
    map.insert(
        fields::PAYLOAD.into(),
        serde_json::to_string(&job.payload)?.to_firestore_value(),
    );
    map.insert(fields::PRIORITY.into(), job.priority.to_firestore_value());
    map.insert(fields::ATTEMPTS.into(), job.attempts.to_firestore_value());
    map.insert(fields::RELEASED_CLAIMS.into(), job.released_claims.to_firestore_value());
    map.insert(fields::WORKER_ID.into(), job.worker_id.to_firestore_value());
    map.insert(fields::CREATED_AT.into(), job.created_at.to_firestore_value());
    map.insert(fields::STARTED_AT.into(), job.started_at.to_firestore_value());
    map.insert(fields::HEARTBEAT_AT.into(), job.heartbeat_at.to_firestore_value());
    map.insert(fields::COMPLETED_AT.into(), job.completed_at.to_firestore_value());
    map.insert(fields::LAST_ERROR.into(), job.last_error.to_firestore_value());
    map.insert(fields::RESULT.into(), result.to_firestore_value());
    Ok(map)
}

fn required<T: FromFirestoreValue>(doc: &Document, id: &str, field: &str) -> QueueResult<T> {
    doc.get(field)
        .ok_or_else(|| QueueError::corrupt(id, format!("missing or invalid field `{}`", field)))
}

pub fn job_from_document(doc: &Document) -> QueueResult<Job> {
    let id = doc
        .id()
        .ok_or_else(|| QueueError::corrupt("<unnamed>", "document has no name"))?
        .to_string();

    let status: String = required(doc, &id, fields::STATUS)?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| QueueError::corrupt(&id, format!("unknown status `{}`", status)))?;
    let payload: String = required(doc, &id, fields::PAYLOAD)?;
    let payload: JobPayload = serde_json::from_str(&payload)?;
    let result = doc
        .get::<String>(fields::RESULT)
        .map(|raw| serde_json::from_str::<ContentAnalysis>(&raw))
        .transpose()?;

    Ok(Job {
        id: JobId::from_string(id.clone()),
        fingerprint: Fingerprint::from_string(required::<String>(doc, &id, fields::FINGERPRINT)?),
        status,
        payload,
        priority: required(doc, &id, fields::PRIORITY)?,
        attempts: required(doc, &id, fields::ATTEMPTS)?,
        released_claims: doc.get(fields::RELEASED_CLAIMS).unwrap_or(0),
        worker_id: doc.get(fields::WORKER_ID),
        created_at: required(doc, &id, fields::CREATED_AT)?,
        started_at: doc.get(fields::STARTED_AT),
        heartbeat_at: doc.get(fields::HEARTBEAT_AT),
        completed_at: doc.get(fields::COMPLETED_AT),
        last_error: doc.get(fields::LAST_ERROR),
        result,
    })
}

pub fn cache_entry_to_fields(entry: &CacheEntry) -> QueueResult<HashMap<String, Value>> {
    let mut map = HashMap::new();
    map.insert(
        fields::RESULT.into(),
        serde_json::to_string(&entry.result)?.to_firestore_value(),
    );
    map.insert(
        fields::SOURCE_JOB_ID.into(),
        entry
            .source_job_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .to_firestore_value(),
    );
    map.insert(fields::CREATED_AT.into(), entry.created_at.to_firestore_value());
    map.insert(fields::EXPIRES_AT.into(), entry.expires_at.to_firestore_value());
    Ok(map)
}

pub fn cache_entry_from_document(doc: &Document) -> QueueResult<CacheEntry> {
    let fingerprint = doc
        .id()
        .ok_or_else(|| QueueError::corrupt("<unnamed>", "document has no name"))?
        .to_string();
    let result: String = required(doc, &fingerprint, fields::RESULT)?;

    Ok(CacheEntry {
        result: serde_json::from_str(&result)?,
        source_job_id: doc.get::<String>(fields::SOURCE_JOB_ID).map(JobId::from),
        created_at: required::<DateTime<Utc>>(doc, &fingerprint, fields::CREATED_AT)?,
        expires_at: required::<DateTime<Utc>>(doc, &fingerprint, fields::EXPIRES_AT)?,
        fingerprint: Fingerprint::from_string(fingerprint),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobMutation;

    fn named(fields: HashMap<String, Value>, collection: &str, id: &str) -> Document {
        let mut doc = Document::new(fields);
        doc.name = Some(format!(
            "projects/p/databases/(default)/documents/{}/{}",
            collection, id
        ));
        doc
    }

    #[test]
    fn test_job_survives_document_mapping() {
        let mut job = Job::new(
            JobPayload::new("https://youtu.be/dQw4w9WgXcQ").with_locale("en"),
            Fingerprint::from_string("abc123"),
        )
        .with_priority(5);
        JobMutation::claim("worker-7").apply(&mut job);
        JobMutation::complete(ContentAnalysis::new("https://youtu.be/dQw4w9WgXcQ")).apply(&mut job);

        let doc = named(job_to_fields(&job).unwrap(), "jobs", job.id.as_str());
        let restored = job_from_document(&doc).unwrap();

        assert_eq!(restored.id, job.id);
        assert_eq!(restored.status, JobStatus::Completed);
        assert_eq!(restored.priority, 5);
        assert_eq!(restored.attempts, 1);
        assert_eq!(restored.worker_id.as_deref(), Some("worker-7"));
        assert_eq!(restored.payload, job.payload);
        assert_eq!(restored.result, job.result);
        assert_eq!(restored.created_at, job.created_at);
        assert!(restored.last_error.is_none());
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let job = Job::new(JobPayload::new("https://example.com"), Fingerprint::from_string("f"));
        let mut fields = job_to_fields(&job).unwrap();
        fields.insert(fields::STATUS.into(), "queued".to_firestore_value());

        let err = job_from_document(&named(fields, "jobs", "j1")).unwrap_err();
        assert!(matches!(err, QueueError::Corrupt { .. }));
    }

    #[test]
    fn test_cache_entry_keyed_by_document_id() {
        let entry = CacheEntry::new(
            Fingerprint::from_string("deadbeef"),
            ContentAnalysis::new("https://example.com"),
            chrono::Duration::hours(6),
        )
        .with_source_job(JobId::from("job-1"));

        let doc = named(cache_entry_to_fields(&entry).unwrap(), "analysis_cache", "deadbeef");
        assert_eq!(cache_entry_from_document(&doc).unwrap(), entry);
    }
}
