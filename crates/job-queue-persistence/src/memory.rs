use crate::{JobStore, PersistenceError, Result};
use chrono::{DateTime, Utc};
use job_queue_core::{Job, JobId, JobStatus, QueueStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Non-durable store for tests and single-process development runs.
/// Records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(PersistenceError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock();

        let next = jobs
            .values()
            .filter(|job| job.is_claimable_at(now))
            .min_by_key(|job| job.claim_key())
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.claim(now)?;

        debug!(job_id = %id, "Claimed job");
        Ok(Some(job.clone()))
    }

    fn compare_and_swap(&self, expected: JobStatus, job: &Job) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&job.id) {
            Some(stored) if stored.status == expected => {
                *stored = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|job| job.claim_key());
        Ok(matching)
    }

    fn count_by_status(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock();
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            stats.record(job.status);
        }
        Ok(stats)
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok(before - jobs.len())
    }
}
