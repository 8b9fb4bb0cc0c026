use crate::{
    api::{create_rest_api, AppState},
    config::{HandlerConfig, HandlerKind, ServerConfig, StoreBackend},
    metrics::QueueMetrics,
    queue::JobQueue,
};
use anyhow::Context;
use axum::Router;
use chrono::Utc;
use job_queue_core::JobError;
use job_queue_persistence::{JobStore, MemoryJobStore, RocksJobStore};
use job_queue_worker::{EchoHandler, HandlerRegistry, HttpForwardHandler, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The job queue server: REST API, worker pool and retention sweep over one
/// shared queue.
pub struct Server {
    config: Arc<ServerConfig>,
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    metrics: Arc<QueueMetrics>,
    shutdown: CancellationToken,
}

/// Build the handler registry from the configured handler table.
pub fn build_registry(handlers: &[HandlerConfig]) -> job_queue_core::Result<HandlerRegistry> {
    let registry = HandlerRegistry::new();

    for handler in handlers {
        match handler.kind {
            HandlerKind::Http => {
                let endpoint = handler.endpoint.as_deref().ok_or_else(|| {
                    JobError::Configuration(format!(
                        "http handler for {} needs an endpoint",
                        handler.job_type
                    ))
                })?;
                let forward = HttpForwardHandler::new(endpoint, handler.request_timeout())
                    .map_err(|e| JobError::Configuration(format!("{:#}", e)))?;
                registry.register(&handler.job_type, forward)?;
            }
            HandlerKind::Echo => {
                registry.register(&handler.job_type, EchoHandler)?;
            }
        }
        debug!(job_type = %handler.job_type, kind = ?handler.kind, "Registered handler");
    }

    Ok(registry)
}

fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    Ok(match config.persistence.backend {
        StoreBackend::Rocksdb => Arc::new(
            RocksJobStore::open(config.to_store_config()).context("failed to open job store")?,
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory job store; jobs will not survive a restart");
            Arc::new(MemoryJobStore::new())
        }
    })
}

impl Server {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let store = open_store(&config)?;
        let registry = Arc::new(build_registry(&config.handlers)?);
        let metrics = Arc::new(QueueMetrics::new()?);

        let queue = Arc::new(JobQueue::new(
            store,
            registry.job_types(),
            config.retry_policy(),
            Arc::clone(&metrics),
        ));

        let recovered = queue.recover_interrupted()?;
        if recovered > 0 {
            warn!("{} jobs were running when the previous process stopped", recovered);
        }

        let pool = Arc::new(WorkerPool::new(
            config.workers.clone(),
            registry,
            Arc::clone(&queue) as Arc<dyn job_queue_worker::JobSource>,
        )?);

        Ok(Server {
            config: Arc::new(config),
            queue,
            pool,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        create_rest_api(AppState {
            queue: Arc::clone(&self.queue),
            pool: Arc::clone(&self.pool),
            metrics: Arc::clone(&self.metrics),
            default_max_retries: self.config.retry.default_max_retries,
        })
    }

    /// Serve until the shutdown token is cancelled, then drain the workers.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.rest_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("REST API listening on {}", addr);

        let pool = Arc::clone(&self.pool);
        let workers = tokio::spawn(async move { pool.run().await });

        if let Some(retention) = self.config.retention() {
            let every = Duration::from_secs(self.config.persistence.retention_check_interval_secs.max(1));
            tokio::spawn(retention_sweep(
                Arc::clone(&self.queue),
                retention,
                every,
                self.shutdown.clone(),
            ));
        }

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await;

        info!("Shutting down job queue server");
        self.shutdown.cancel();
        self.pool.shutdown();
        if let Err(e) = workers.await {
            error!("Worker pool task failed: {}", e);
        }

        served?;
        Ok(())
    }
}

async fn retention_sweep(
    queue: Arc<JobQueue>,
    retention: chrono::Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!("Retention sweep enabled: purging terminal jobs older than {} days", retention.num_days());
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match queue.purge_terminal_before(Utc::now() - retention) {
                    Ok(0) => debug!("Retention sweep found nothing to purge"),
                    Ok(purged) => info!("Retention sweep purged {} jobs", purged),
                    Err(e) => error!("Retention sweep failed: {}", e),
                }
            }
            _ = shutdown.cancelled() => {
                break;
            }
        }
    }
}
