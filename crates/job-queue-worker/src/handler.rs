use async_trait::async_trait;
use job_queue_core::{JobError, JobType, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes the payload of one job attempt.
///
/// Any error returned here (as well as a panic or a timeout around the call)
/// is routed through the queue's failure path; handlers never need to catch
/// their own failures.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> anyhow::Result<Value>;
}

/// Registry of job handlers by job type
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a job type. The tag must be valid and not
    /// already registered.
    pub fn register<H: JobHandler + 'static>(&self, job_type: &str, handler: H) -> Result<JobType> {
        self.register_arc(job_type, Arc::new(handler))
    }

    pub fn register_arc(&self, job_type: &str, handler: Arc<dyn JobHandler>) -> Result<JobType> {
        let job_type = JobType::new(job_type)?;
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&job_type) {
            return Err(JobError::Configuration(format!(
                "handler for job type {} registered twice",
                job_type
            )));
        }
        handlers.insert(job_type.clone(), handler);
        Ok(job_type)
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(job_type).cloned()
    }

    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.read().contains_key(job_type)
    }

    /// All registered job types, sorted
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the payload unchanged
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn execute(&self, payload: &Value) -> anyhow::Result<Value> {
        Ok(payload.clone())
    }
}
