//! Worker loops running against a shared in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use vidq_analyzer::testing::ScriptedAnalyzer;
use vidq_analyzer::{AnalyzerError, AnalyzerHandle, AnalyzerPool, AnalyzerPoolConfig};
use vidq_models::{Fingerprint, Job, JobPayload, JobStatus};
use vidq_queue::{JobStore, MemoryCacheStore, MemoryJobStore};
use vidq_worker::{CycleOutcome, JobExecutor, WorkerConfig, WorkerDeps, WorkerLoop};

fn pool(regions: &[(&str, Arc<ScriptedAnalyzer>)]) -> AnalyzerPool {
    let handles = regions
        .iter()
        .map(|(region, analyzer)| AnalyzerHandle::new(*region, 2, analyzer.clone()))
        .collect();
    AnalyzerPool::new(
        handles,
        AnalyzerPoolConfig {
            acquire_timeout: Duration::from_millis(200),
            failover_wait: Duration::from_millis(20),
            call_timeout: Duration::from_secs(5),
            failure_threshold: 100,
            cooldown: Duration::from_millis(100),
        },
    )
}

fn config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        max_attempts: 3,
        stale_after: Duration::from_secs(60),
        acquire_timeout: Duration::from_millis(200),
        heartbeat_interval: Duration::from_millis(50),
        idle_min: Duration::from_millis(1),
        idle_max: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn job(n: usize) -> Job {
    let payload = JobPayload::new(format!("https://example.com/videos/{}.mp4", n));
    let fingerprint = Fingerprint::derive(&payload).unwrap();
    Job::new(payload, fingerprint).with_priority((n % 3) as i32)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_finish_every_job_once() {
    let jobs = Arc::new(MemoryJobStore::new());
    let cache = Arc::new(MemoryCacheStore::new());
    let east = Arc::new(ScriptedAnalyzer::succeeding().with_delay(Duration::from_millis(5)));
    let west = Arc::new(ScriptedAnalyzer::succeeding().with_delay(Duration::from_millis(5)));

    for n in 0..24 {
        jobs.insert(job(n)).await.unwrap();
    }

    let executor = Arc::new(JobExecutor::new(
        config(6),
        WorkerDeps {
            jobs: jobs.clone(),
            cache: cache.clone(),
            pool: pool(&[("east", east.clone()), ("west", west.clone())]),
        },
    ));
    let running = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run().await }
    });

    let all_done = async {
        loop {
            let all = jobs.all().await;
            if all.iter().all(|j| j.status.is_terminal()) {
                return all;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let finished = tokio::time::timeout(Duration::from_secs(10), all_done)
        .await
        .expect("jobs did not finish");

    executor.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(finished.len(), 24);
    assert!(finished
        .iter()
        .all(|j| j.status == JobStatus::Completed && j.charged_attempts() == 1));
    // Each job was analyzed exactly once across both regions.
    assert_eq!(east.calls() + west.calls(), 24);
    assert_eq!(cache.len().await, 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_are_isolated_per_job() {
    let jobs = Arc::new(MemoryJobStore::new());
    let analyzer = Arc::new(ScriptedAnalyzer::succeeding());
    analyzer.push(Err(AnalyzerError::invalid_input("unsupported container")));

    let first = job(1);
    jobs.insert(first.clone()).await.unwrap();

    let deps = WorkerDeps {
        jobs: jobs.clone(),
        cache: Arc::new(MemoryCacheStore::new()),
        pool: pool(&[("only", analyzer.clone())]),
    };
    let mut worker = WorkerLoop::new("w-test", deps, config(1));
    let (_tx, rx) = tokio::sync::watch::channel(false);

    assert_eq!(
        worker.run_once(&rx).await.unwrap(),
        CycleOutcome::Failed(first.id.clone())
    );

    let second = job(2);
    jobs.insert(second.clone()).await.unwrap();
    assert_eq!(
        worker.run_once(&rx).await.unwrap(),
        CycleOutcome::Completed(second.id.clone())
    );
    assert_eq!(jobs.get(&first.id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_crashed_worker_job_is_reclaimed_with_attempt_increment() {
    let jobs = Arc::new(MemoryJobStore::new());
    let analyzer = Arc::new(ScriptedAnalyzer::succeeding());

    let mut abandoned = job(7);
    abandoned.status = JobStatus::Processing;
    abandoned.attempts = 1;
    abandoned.worker_id = Some("crashed-worker".to_string());
    abandoned.started_at = Some(Utc::now() - chrono::Duration::hours(2));
    abandoned.heartbeat_at = abandoned.started_at;
    jobs.put_raw(abandoned.clone()).await;

    let deps = WorkerDeps {
        jobs: jobs.clone(),
        cache: Arc::new(MemoryCacheStore::new()),
        pool: pool(&[("only", analyzer)]),
    };
    let mut worker = WorkerLoop::new("rescuer", deps, config(1));
    let (_tx, rx) = tokio::sync::watch::channel(false);

    assert_eq!(
        worker.run_once(&rx).await.unwrap(),
        CycleOutcome::Completed(abandoned.id.clone())
    );
    let stored = jobs.get(&abandoned.id).await.unwrap();
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.worker_id.as_deref(), Some("rescuer"));
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_stale_job_without_budget_is_buried() {
    let jobs = Arc::new(MemoryJobStore::new());
    let analyzer = Arc::new(ScriptedAnalyzer::succeeding());

    let mut abandoned = job(9);
    abandoned.status = JobStatus::Processing;
    abandoned.attempts = 3;
    abandoned.worker_id = Some("crashed-worker".to_string());
    abandoned.started_at = Some(Utc::now() - chrono::Duration::hours(2));
    jobs.put_raw(abandoned.clone()).await;

    let deps = WorkerDeps {
        jobs: jobs.clone(),
        cache: Arc::new(MemoryCacheStore::new()),
        pool: pool(&[("only", analyzer.clone())]),
    };
    let mut worker = WorkerLoop::new("sweeper", deps, config(1));
    let (_tx, rx) = tokio::sync::watch::channel(false);

    assert_eq!(worker.run_once(&rx).await.unwrap(), CycleOutcome::Empty);
    let stored = jobs.get(&abandoned.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Dead);
    assert!(stored
        .last_error
        .unwrap()
        .contains("abandoned by worker crashed-worker"));
    assert_eq!(analyzer.calls(), 0);
}
