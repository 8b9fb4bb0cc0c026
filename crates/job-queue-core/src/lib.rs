mod error;
mod job;
pub mod retry;

pub use error::{JobError, Result};
pub use job::{Job, JobId, JobStatus, JobType, QueueStats, MAX_JOB_TYPE_LEN};
pub use retry::{RetryDecision, RetryPolicy};

/// Retry budget applied when a producer does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
