//! The worker: a bounded-concurrency queue consumer
//!
//! Pulls jobs from the work queue, executes them against the live cluster
//! and settles them back into the queue (complete, retry or park). A small
//! fixed pool and a start-rate limit keep cluster pressure bounded; jobs
//! for the same deployment are serialized by the queue itself.

use crate::error::Result;
use crate::queue::WorkQueue;
use crate::recovery::ReleaseStore;
use caravel_cluster::ReadinessOptions;
use caravel_engine::{DeploymentEngine, DeploymentStatus, DeploymentStore, Job, JobKind, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Jobs executing at once
    pub concurrency: usize,
    /// Minimum gap between job starts (the rate limit)
    pub start_gap: Duration,
    /// Readiness wait for deploy/upgrade
    pub readiness: ReadinessOptions,
    /// Readiness poll for health checks (brief)
    pub health: ReadinessOptions,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            start_gap: Duration::from_secs(10),
            readiness: ReadinessOptions::default(),
            health: ReadinessOptions::brief(),
        }
    }
}

pub(crate) struct WorkerMetrics {
    pub processed: metrics::Counter,
    pub failed: metrics::Counter,
    pub duration: metrics::Histogram,
}

impl WorkerMetrics {
    fn new() -> Self {
        Self {
            processed: metrics::counter!("caravel_worker_jobs_processed_total"),
            failed: metrics::counter!("caravel_worker_jobs_failed_total"),
            duration: metrics::histogram!("caravel_worker_job_duration_seconds"),
        }
    }
}

/// Consumes the work queue and drives deployments to their terminal state
pub struct Worker {
    pub(crate) engine: Arc<DeploymentEngine>,
    queue: Arc<WorkQueue>,
    pub(crate) releases: Option<Arc<dyn ReleaseStore>>,
    pub(crate) settings: WorkerSettings,
    semaphore: Arc<Semaphore>,
    metrics: WorkerMetrics,
}

impl Worker {
    pub fn new(engine: Arc<DeploymentEngine>, queue: Arc<WorkQueue>, settings: WorkerSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            engine,
            queue,
            releases: None,
            settings,
            semaphore,
            metrics: WorkerMetrics::new(),
        }
    }

    /// Enable the legacy chart-release recovery path
    pub fn with_release_store(mut self, releases: Arc<dyn ReleaseStore>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Run forever: recover stranded work, then consume the queue.
    pub async fn run(self: Arc<Self>) {
        info!(
            concurrency = self.settings.concurrency,
            "Worker starting"
        );
        if let Err(e) = self.resume_interrupted().await {
            error!(error = %e, "Startup recovery sweep failed");
        }

        loop {
            let job = self.queue.pop().await;
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let worker = self.clone();
            tokio::spawn(async move {
                worker.execute(job).await;
                drop(permit);
            });
            // bounded start rate keeps cluster pressure predictable
            tokio::time::sleep(self.settings.start_gap).await;
        }
    }

    /// Execute one job and settle it with the queue.
    pub async fn execute(&self, job: Job) {
        let start = std::time::Instant::now();
        debug!(job = %job.id, kind = %job.kind, "Executing job");

        let result = match job.kind {
            JobKind::Deploy | JobKind::Upgrade => self.handle_rollout(&job).await,
            JobKind::Undeploy => self.handle_undeploy(&job).await,
            JobKind::HealthCheck => self.handle_health_check(&job).await,
        };
        self.metrics.duration.record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.processed.increment(1);
                self.queue.complete(&job);
            }
            Err(e) => {
                self.metrics.failed.increment(1);
                warn!(job = %job.id, error = %e, "Job failed");
                self.queue.retry_or_park(&job, &e.to_string());
            }
        }
    }

    /// Process queued jobs until the queue is momentarily empty. Used by
    /// tests and one-shot tooling; production uses [`run`](Self::run).
    pub async fn drain(&self) {
        while let Some(job) = self.queue.try_pop() {
            self.execute(job).await;
        }
    }

    /// Re-enqueue rows a killed worker left mid-lifecycle.
    ///
    /// PENDING rows still need their first rollout, DEPLOYING rows need a
    /// rebuild (their job may have half-applied), DELETING rows need their
    /// cleanup finished. All cluster mutations are idempotent, so re-running
    /// is safe.
    pub async fn resume_interrupted(&self) -> Result<()> {
        for row in self.engine.store().list_all().await? {
            let job = match row.status {
                DeploymentStatus::Pending => Job::new(JobKind::Deploy, row.id),
                DeploymentStatus::Deploying => Job::new(JobKind::Upgrade, row.id),
                DeploymentStatus::Deleting => {
                    let mut job = Job::new(JobKind::Undeploy, row.id);
                    if let Some(graph) = &row.graph {
                        job = job.with_graph(graph.clone());
                    }
                    job
                }
                _ => continue,
            };
            info!(deployment = %row.id, status = %row.status, kind = %job.kind, "Resuming interrupted work");
            self.engine
                .queue()
                .enqueue(job)
                .await
                .map_err(crate::error::WorkerError::Engine)?;
        }
        Ok(())
    }

    /// Enqueue a health check for every RUNNING deployment. This is how
    /// externally-induced failures (evictions, crash loops) surface without
    /// a user action.
    pub async fn sweep_health(&self) -> Result<()> {
        for row in self.engine.store().list_all().await? {
            if row.status == DeploymentStatus::Running {
                self.engine
                    .queue()
                    .enqueue(Job::new(JobKind::HealthCheck, row.id))
                    .await
                    .map_err(crate::error::WorkerError::Engine)?;
            }
        }
        Ok(())
    }

    /// Periodic health sweeping, for the daemon to spawn
    pub async fn run_health_sweeper(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.sweep_health().await {
                warn!(error = %e, "Health sweep failed");
            }
        }
    }
}
