use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix for worker names in logs (defaults to `<hostname>-<pid>`)
    pub worker_name: Option<String>,
    pub concurrency: usize,
    /// Sleep between claim attempts when the queue is empty
    pub poll_interval_ms: u64,
    /// Per-attempt handler time limit, 0 = unlimited
    pub job_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_name: None,
            concurrency: 4,
            poll_interval_ms: 5_000,
            job_timeout_secs: 30 * 60,
            graceful_shutdown_timeout_secs: 60,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }

    pub fn generate_worker_name(&self, index: usize) -> String {
        let prefix = match &self.worker_name {
            Some(name) => name.clone(),
            None => {
                let hostname = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{}-{}", hostname, std::process::id())
            }
        };

        format!("{}-w{}", prefix, index)
    }
}
