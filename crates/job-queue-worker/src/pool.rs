use crate::{config::WorkerConfig, executor::JobExecutor, handler::HandlerRegistry};
use async_trait::async_trait;
use job_queue_core::{Job, JobError, JobId, JobType, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where workers get jobs from and report outcomes to.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Job types this source may hand out
    fn job_types(&self) -> Vec<JobType>;

    async fn claim_next(&self) -> Result<Option<Job>>;

    async fn complete(&self, id: JobId, result: Value) -> Result<()>;

    async fn fail(&self, id: JobId, error: String) -> Result<()>;
}

/// Fixed-size set of workers draining a `JobSource`.
pub struct WorkerPool {
    config: WorkerConfig,
    registry: Arc<HandlerRegistry>,
    source: Arc<dyn JobSource>,
    busy: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

struct WorkerContext {
    name: String,
    config: WorkerConfig,
    registry: Arc<HandlerRegistry>,
    source: Arc<dyn JobSource>,
    busy: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Build a pool, checking that every job type the source can hand out
    /// has a registered handler.
    pub fn new(
        config: WorkerConfig,
        registry: Arc<HandlerRegistry>,
        source: Arc<dyn JobSource>,
    ) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(JobError::Configuration(
                "workers.concurrency must be at least 1".to_string(),
            ));
        }

        let missing: Vec<String> = source
            .job_types()
            .iter()
            .filter(|job_type| !registry.has_handler(job_type.as_str()))
            .map(|job_type| job_type.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(JobError::Configuration(format!(
                "no handler registered for job types: {}",
                missing.join(", ")
            )));
        }

        Ok(WorkerPool {
            config,
            registry,
            source,
            busy: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Workers currently executing a job
    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop claiming new jobs; `run` returns once running jobs finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run all workers until shutdown is requested.
    pub async fn run(&self) {
        info!(
            "Starting worker pool (concurrency: {}, job types: {:?})",
            self.config.concurrency,
            self.registry.job_types()
        );

        let mut workers = JoinSet::new();
        for index in 0..self.config.concurrency {
            let context = WorkerContext {
                name: self.config.generate_worker_name(index),
                config: self.config.clone(),
                registry: Arc::clone(&self.registry),
                source: Arc::clone(&self.source),
                busy: Arc::clone(&self.busy),
                shutdown: self.shutdown.clone(),
            };
            workers.spawn(context.run());
        }

        self.shutdown.cancelled().await;
        info!("Worker pool shutting down, waiting for running jobs...");

        let deadline = self.config.graceful_shutdown_timeout();
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task ended abnormally: {}", e);
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All workers stopped"),
            Err(_) => {
                warn!(
                    "Shutdown deadline exceeded, {} jobs still running",
                    self.busy_workers()
                );
                workers.abort_all();
            }
        }
    }
}

/// Counts a worker as busy for as long as it is held, including when the
/// worker task is aborted mid-job.
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn new(busy: &Arc<AtomicUsize>) -> Self {
        busy.fetch_add(1, Ordering::Relaxed);
        BusyGuard(Arc::clone(busy))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl WorkerContext {
    async fn run(self) {
        debug!(worker = %self.name, "Worker started");

        while !self.shutdown.is_cancelled() {
            match self.source.claim_next().await {
                Ok(Some(job)) => {
                    let _busy = BusyGuard::new(&self.busy);
                    self.process(job).await;
                }
                Ok(None) => self.idle().await,
                Err(e) => {
                    error!(worker = %self.name, "Failed to claim job: {}", e);
                    self.idle().await;
                }
            }
        }

        debug!(worker = %self.name, "Worker stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval()) => {}
        }
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;

        let Some(handler) = self.registry.get(job.job_type.as_str()) else {
            // Only reachable for records persisted under a since-removed type.
            let message = format!("no handler registered for job type {}", job.job_type);
            error!(worker = %self.name, job_id = %job_id, "{}", message);
            self.report_failure(job_id, message).await;
            return;
        };

        let executor = JobExecutor::new(handler, self.config.job_timeout());
        match executor.execute(&job).await {
            Ok(result) => {
                if let Err(e) = self.source.complete(job_id, result).await {
                    error!(worker = %self.name, job_id = %job_id, "Failed to record job success: {}", e);
                }
            }
            Err(e) => {
                let message = match e {
                    JobError::HandlerFailure(message) => message,
                    other => other.to_string(),
                };
                self.report_failure(job_id, message).await;
            }
        }
    }

    async fn report_failure(&self, job_id: JobId, message: String) {
        if let Err(e) = self.source.fail(job_id, message).await {
            error!(worker = %self.name, job_id = %job_id, "Failed to record job failure: {}", e);
        }
    }
}
