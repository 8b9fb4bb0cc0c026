use crate::metrics::QueueMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_queue_core::{
    Job, JobError, JobId, JobStatus, JobType, QueueStats, Result, RetryDecision, RetryPolicy,
};
use job_queue_persistence::JobStore;
use job_queue_worker::JobSource;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const INTERRUPTED_ERROR: &str = "interrupted by process restart";

/// Queue of background jobs: submission, claiming, outcome recording,
/// automatic and manual retries, and read-only status queries.
///
/// All state lives in the `JobStore`; every status change is a
/// compare-and-swap against the status the change was computed from.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    job_types: HashSet<JobType>,
    retry_policy: RetryPolicy,
    metrics: Arc<QueueMetrics>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        job_types: impl IntoIterator<Item = JobType>,
        retry_policy: RetryPolicy,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        JobQueue {
            store,
            job_types: job_types.into_iter().collect(),
            retry_policy,
            metrics,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Persist a new queued job. Never waits on execution.
    pub fn add_job(&self, job_type: &str, payload: Value, max_retries: u32) -> Result<JobId> {
        let job_type = self
            .job_types
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobType(job_type.to_string()))?;

        let job = Job::new(job_type, payload, max_retries);
        self.store.insert(&job)?;

        self.metrics.inc_jobs_total("queued", job.job_type.as_str());
        info!(job_id = %job.id, job_type = %job.job_type, max_retries, "Job queued");
        Ok(job.id)
    }

    /// Claim the oldest eligible queued job, if any.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let job = self.store.claim_next(Utc::now())?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, job_type = %job.job_type, retry_count = job.retry_count, "Job claimed");
        }
        Ok(job)
    }

    /// Record a successful attempt. Only valid for running jobs.
    pub fn complete(&self, id: &JobId, result: Value) -> Result<()> {
        let now = Utc::now();
        let (job, ()) = self.transition(id, |job| job.complete(result, now))?;

        self.metrics.inc_jobs_total("succeeded", job.job_type.as_str());
        self.observe_attempt(&job.job_type, job.started_at, now);
        info!(job_id = %id, job_type = %job.job_type, "Job succeeded");
        Ok(())
    }

    /// Record a failed attempt. The job is re-queued with backoff while it
    /// has retries left, otherwise it becomes terminally failed.
    pub fn fail(&self, id: &JobId, error: impl Into<String>) -> Result<RetryDecision> {
        let error = error.into();
        let now = Utc::now();
        let mut started_at = None;
        let (job, decision) = self.transition(id, |job| {
            started_at = job.started_at;
            self.retry_policy.apply(job, error, now)
        })?;
        self.observe_attempt(&job.job_type, started_at, now);

        let message = job.error.as_deref().unwrap_or_default();
        match decision {
            RetryDecision::Requeued { retry_count, available_at } => {
                self.metrics.inc_jobs_total("requeued", job.job_type.as_str());
                warn!(
                    job_id = %id,
                    job_type = %job.job_type,
                    retry_count,
                    max_retries = job.max_retries,
                    %available_at,
                    "Job attempt failed, re-queued: {}",
                    message
                );
            }
            RetryDecision::Exhausted { retry_count } => {
                self.metrics.inc_jobs_total("failed", job.job_type.as_str());
                error!(
                    job_id = %id,
                    job_type = %job.job_type,
                    retry_count,
                    "Job failed permanently: {}",
                    message
                );
            }
        }
        Ok(decision)
    }

    /// Snapshot of a job, or `None` for an unknown id.
    pub fn get_job_status(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.store.get(id)?)
    }

    pub fn get_queue_stats(&self) -> Result<QueueStats> {
        Ok(self.store.count_by_status()?)
    }

    /// Re-submit a terminally failed job as a brand new job with the same
    /// type, payload and retry budget. The failed record is kept as is.
    pub fn retry_failed_job(&self, id: &JobId) -> Result<JobId> {
        let failed = self.store.get(id)?.ok_or(JobError::NotFound(*id))?;
        let job = failed.resubmit()?;
        self.store.insert(&job)?;

        self.metrics.inc_jobs_total("queued", job.job_type.as_str());
        info!(job_id = %job.id, retried_from = %id, job_type = %job.job_type, "Failed job re-submitted");
        Ok(job.id)
    }

    /// Route jobs left running by a previous process through the failure
    /// path. Call once at startup, before any worker runs.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let interrupted = self.store.list_by_status(JobStatus::Running)?;
        let count = interrupted.len();
        for job in interrupted {
            warn!(job_id = %job.id, job_type = %job.job_type, "Recovering interrupted job");
            self.fail(&job.id, INTERRUPTED_ERROR)?;
        }
        if count > 0 {
            info!("Recovered {} interrupted jobs", count);
        }
        Ok(count)
    }

    /// Delete terminal jobs completed before `cutoff`. Retention only; the
    /// lifecycle operations above never delete.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.store.purge_terminal_before(cutoff)?)
    }

    /// Refresh the per-status gauges from the store.
    pub fn refresh_metrics(&self) -> Result<QueueStats> {
        let stats = self.get_queue_stats()?;
        self.metrics.update_job_gauges(&stats);
        Ok(stats)
    }

    fn observe_attempt(&self, job_type: &JobType, started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        if let Some(started) = started_at {
            let elapsed = (now - started).to_std().unwrap_or_default();
            self.metrics
                .observe_duration(job_type.as_str(), elapsed.as_secs_f64());
        }
    }

    /// Load, modify and conditionally write back one job.
    fn transition<T>(
        &self,
        id: &JobId,
        apply: impl FnOnce(&mut Job) -> Result<T>,
    ) -> Result<(Job, T)> {
        let mut job = self.store.get(id)?.ok_or(JobError::NotFound(*id))?;
        let from = job.status;
        let outcome = apply(&mut job)?;

        if self.store.compare_and_swap(from, &job)? {
            return Ok((job, outcome));
        }

        // Another writer changed the job between our read and write.
        let current = self.store.get(id)?.ok_or(JobError::NotFound(*id))?;
        Err(JobError::InvalidTransition {
            id: *id,
            from: current.status,
            to: job.status,
        })
    }
}

#[async_trait]
impl JobSource for JobQueue {
    fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.job_types.iter().cloned().collect();
        types.sort();
        types
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        JobQueue::claim_next(self)
    }

    async fn complete(&self, id: JobId, result: Value) -> Result<()> {
        JobQueue::complete(self, &id, result)
    }

    async fn fail(&self, id: JobId, error: String) -> Result<()> {
        JobQueue::fail(self, &id, error).map(|_| ())
    }
}
