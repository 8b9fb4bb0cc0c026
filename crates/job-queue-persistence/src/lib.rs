mod memory;
mod rocks;

pub use memory::MemoryJobStore;
pub use rocks::{RocksJobStore, RocksStoreConfig};

use chrono::{DateTime, Utc};
use job_queue_core::{Job, JobError, JobId, JobStatus, QueueStats};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Job error: {0}")]
    JobError(#[from] JobError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl From<PersistenceError> for JobError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::JobError(inner) => inner,
            other => JobError::Persistence(other.to_string()),
        }
    }
}

/// Storage for job records.
///
/// Every method is atomic with respect to the others on the same store.
/// `claim_next` and `compare_and_swap` are the only ways a stored record
/// changes status, which is what keeps one worker per running job.
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with `AlreadyExists` on a duplicate id.
    fn insert(&self, job: &Job) -> Result<()>;

    fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Select the queued job with the smallest `(available_at, id)` among
    /// those claimable at `now`, move it to running and return it.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Overwrite the record with `job` only if the stored status is still
    /// `expected`. Returns false (and writes nothing) otherwise, including
    /// when no record exists.
    fn compare_and_swap(&self, expected: JobStatus, job: &Job) -> Result<bool>;

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    fn count_by_status(&self) -> Result<QueueStats>;

    /// Delete terminal records whose `completed_at` is before `cutoff`.
    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
