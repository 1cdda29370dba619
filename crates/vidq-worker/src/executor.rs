//! Job executor: runs several worker loops in one process.

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::worker::{stopped, WorkerDeps, WorkerLoop};

pub struct JobExecutor {
    config: WorkerConfig,
    deps: WorkerDeps,
    shutdown: watch::Sender<bool>,
    instance: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Self {
        let (shutdown, _) = watch::channel(false);
        let instance = format!("{}-{}", config.worker_name, &Uuid::new_v4().simple().to_string()[..8]);

        Self {
            config,
            deps,
            shutdown,
            instance,
        }
    }

    /// Identity prefix shared by this process's loops.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then wait up to the
    /// shutdown timeout for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            instance = %self.instance,
            loops = self.config.concurrency,
            max_attempts = self.config.max_attempts,
            "Starting job executor"
        );

        let mut loops = JoinSet::new();
        for i in 0..self.config.concurrency {
            let worker = WorkerLoop::new(
                format!("{}-{}", self.instance, i),
                self.deps.clone(),
                self.config.clone(),
            );
            loops.spawn(worker.run(self.shutdown.subscribe()));
        }

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = stopped(&mut shutdown) => {
                info!("Shutdown signal received, waiting for in-flight jobs");
            }
            _ = async { while loops.join_next().await.is_some() {} } => {
                warn!("All worker loops exited");
                return Ok(());
            }
        }

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while loops.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "Worker loops did not stop in time, aborting"
            );
            loops.abort_all();
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
