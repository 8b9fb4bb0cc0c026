use job_queue_core::{RetryPolicy, DEFAULT_MAX_RETRIES};
use job_queue_persistence::RocksStoreConfig;
use job_queue_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub workers: WorkerConfig,
    pub retry: RetryConfig,
    pub handlers: Vec<HandlerConfig>,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub rest_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Rocksdb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub sync_writes: bool,
    /// Purge terminal jobs this many days after completion; unset keeps them forever
    pub retention_days: Option<i64>,
    pub retention_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Used when a submission does not carry `max_retries`
    pub default_max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Http,
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub job_type: String,
    #[serde(default)]
    pub kind: HandlerKind,
    /// Required for `http` handlers
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            rest_port: 8080,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            backend: StoreBackend::Rocksdb,
            data_dir: PathBuf::from("./data"),
            sync_writes: true,
            retention_days: None,
            retention_check_interval_secs: 3600,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetryConfig {
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl HandlerConfig {
    pub fn http(job_type: &str, endpoint: &str) -> Self {
        HandlerConfig {
            job_type: job_type.to_string(),
            kind: HandlerKind::Http,
            endpoint: Some(endpoint.to_string()),
            request_timeout_secs: None,
        }
    }

    pub fn echo(job_type: &str) -> Self {
        HandlerConfig {
            job_type: job_type.to_string(),
            kind: HandlerKind::Echo,
            endpoint: None,
            request_timeout_secs: None,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// The content platform's integration routes, served by the web app.
fn default_handlers() -> Vec<HandlerConfig> {
    vec![
        HandlerConfig::http("image-integration", "http://127.0.0.1:3000/api/integrate-images"),
        HandlerConfig::http("post-mutation", "http://127.0.0.1:3000/api/posts"),
    ]
}

impl ServerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Defaults plus the built-in handler table. `Default` alone registers
    /// no handlers.
    pub fn with_default_handlers() -> Self {
        ServerConfig {
            handlers: default_handlers(),
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.base_delay_ms, self.retry.max_delay_ms)
    }

    pub fn to_store_config(&self) -> RocksStoreConfig {
        RocksStoreConfig {
            data_dir: self.persistence.data_dir.clone(),
            sync_writes: self.persistence.sync_writes,
        }
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.persistence
            .retention_days
            .filter(|days| *days > 0)
            .map(chrono::Duration::days)
    }
}
