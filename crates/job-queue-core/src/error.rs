use crate::{JobId, JobStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} is {status}, only failed jobs can be retried")]
    InvalidState { id: JobId, status: JobStatus },

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, JobError>;
