#![allow(dead_code)]

use job_queue_broker::{JobQueue, QueueMetrics};
use job_queue_core::{JobType, RetryPolicy};
use job_queue_persistence::{JobStore, MemoryJobStore};
use std::sync::Arc;

pub const JOB_TYPES: [&str; 3] = ["image-integration", "post-mutation", "echo"];

pub fn job_types() -> Vec<JobType> {
    JOB_TYPES.iter().map(|t| JobType::new(*t).unwrap()).collect()
}

pub fn queue_over(store: Arc<dyn JobStore>, policy: RetryPolicy) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        store,
        job_types(),
        policy,
        Arc::new(QueueMetrics::new().unwrap()),
    ))
}

/// In-memory queue with no retry backoff
pub fn memory_queue() -> Arc<JobQueue> {
    queue_over(Arc::new(MemoryJobStore::new()), RetryPolicy::immediate())
}
