use crate::{JobError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job. Version 7 ids sort by creation time.
pub type JobId = Uuid;

pub const MAX_JOB_TYPE_LEN: usize = 64;

/// Tag selecting the handler for a job (e.g. "image-integration").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    /// Validate and wrap a tag: non-empty ASCII alphanumerics plus `-`, `_`
    /// and `.`, at most [`MAX_JOB_TYPE_LEN`] characters.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.is_empty() || tag.len() > MAX_JOB_TYPE_LEN {
            return Err(JobError::Configuration(format!(
                "job type must be 1..={MAX_JOB_TYPE_LEN} characters, got {:?}",
                tag
            )));
        }
        if let Some(bad) = tag
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(JobError::Configuration(format!(
                "job type {:?} contains invalid character {:?}",
                tag, bad
            )));
        }
        Ok(JobType(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by exactly one worker
    Running,
    /// Handler returned a result (terminal)
    Succeeded,
    /// Retry budget exhausted (terminal)
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of background work and its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the job may be claimed; pushed forward by retry backoff.
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Message from the most recent failed attempt.
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Job {
    pub fn new(job_type: JobType, payload: Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::now_v7(),
            job_type,
            payload,
            status: JobStatus::Queued,
            created_at: now,
            available_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            error: None,
            result: None,
        }
    }

    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.available_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Ordering key for claims: earliest `available_at`, then id.
    pub fn claim_key(&self) -> (DateTime<Utc>, JobId) {
        (self.available_at, self.id)
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != expected {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// queued -> running
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now.max(self.created_at));
        self.completed_at = None;
        self.error = None;
        Ok(())
    }

    /// running -> succeeded
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Succeeded)?;
        let started = self.started_at.unwrap_or(self.created_at);
        self.status = JobStatus::Succeeded;
        self.completed_at = Some(now.max(started));
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// running -> queued, consuming one retry.
    pub(crate) fn requeue(&mut self, error: String, available_at: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        self.retry_count += 1;
        self.available_at = available_at;
        self.started_at = None;
        self.completed_at = None;
        self.error = Some(error);
        Ok(())
    }

    /// running -> failed
    pub(crate) fn fail_terminally(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Failed)?;
        let started = self.started_at.unwrap_or(self.created_at);
        self.status = JobStatus::Failed;
        self.completed_at = Some(now.max(started));
        self.error = Some(error);
        Ok(())
    }

    /// Build a fresh queued job carrying this failed job's type, payload and
    /// retry budget. The original record is left untouched.
    pub fn resubmit(&self) -> Result<Job> {
        if self.status != JobStatus::Failed {
            return Err(JobError::InvalidState {
                id: self.id,
                status: self.status,
            });
        }
        Ok(Job::new(
            self.job_type.clone(),
            self.payload.clone(),
            self.max_retries,
        ))
    }
}

/// Job counts per status at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn record(&mut self, status: JobStatus) {
        *self.slot(status) += 1;
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Running => self.running,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.running + self.succeeded + self.failed
    }

    fn slot(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Running => &mut self.running,
            JobStatus::Succeeded => &mut self.succeeded,
            JobStatus::Failed => &mut self.failed,
        }
    }
}
