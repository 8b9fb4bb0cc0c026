pub mod api;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod server;

pub use config::ServerConfig;
pub use metrics::QueueMetrics;
pub use queue::JobQueue;
pub use server::Server;
