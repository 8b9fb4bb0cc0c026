pub mod config;
pub mod executor;
pub mod handler;
pub mod http;
pub mod pool;

pub use config::WorkerConfig;
pub use executor::JobExecutor;
pub use handler::{EchoHandler, HandlerRegistry, JobHandler};
pub use http::HttpForwardHandler;
pub use pool::{JobSource, WorkerPool};
