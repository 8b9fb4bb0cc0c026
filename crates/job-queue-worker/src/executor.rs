use crate::handler::JobHandler;
use job_queue_core::{Job, JobError, Result};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Runs one attempt of a job in its own task. Any failure to produce a result,
/// including panics and overruns, comes back as `HandlerFailure`.
pub struct JobExecutor {
    handler: Arc<dyn JobHandler>,
    timeout: Option<Duration>,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl JobExecutor {
    pub fn new(handler: Arc<dyn JobHandler>, timeout: Option<Duration>) -> Self {
        JobExecutor { handler, timeout }
    }

    pub async fn execute(&self, job: &Job) -> Result<Value> {
        let job_id = job.id;
        let handler = Arc::clone(&self.handler);
        let payload = job.payload.clone();

        info!(job_id = %job_id, job_type = %job.job_type, attempt = job.retry_count + 1, "Executing job");

        let mut handle = tokio::spawn(async move { handler.execute(&payload).await });

        let joined = match self.timeout {
            Some(limit) => match timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    error!(job_id = %job_id, "Job timed out after {:?}", limit);
                    return Err(JobError::HandlerFailure(format!(
                        "job execution timed out after {:?}",
                        limit
                    )));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => {
                info!(job_id = %job_id, "Job completed successfully");
                Ok(result)
            }
            Ok(Err(e)) => {
                error!(job_id = %job_id, "Job failed: {:#}", e);
                Err(JobError::HandlerFailure(format!("{:#}", e)))
            }
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let message = panic_message(panic.as_ref());
                error!(job_id = %job_id, "Job handler panicked: {}", message);
                Err(JobError::HandlerFailure(format!("handler panicked: {}", message)))
            }
            Err(_) => {
                error!(job_id = %job_id, "Job was cancelled");
                Err(JobError::HandlerFailure("job execution was cancelled".to_string()))
            }
        }
    }
}
