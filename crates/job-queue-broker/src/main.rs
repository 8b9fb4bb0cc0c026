use clap::Parser;
use job_queue_broker::{
    config::{LogFormat, StoreBackend},
    Server, ServerConfig,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "jq-broker")]
#[command(about = "Background job queue server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// REST API port
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for the RocksDB store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long)]
    concurrency: Option<usize>,

    /// Keep jobs in memory only (nothing survives a restart)
    #[arg(long)]
    in_memory: bool,
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.monitoring.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

/// Resolves on ctrl-c, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::with_default_handlers()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.rest_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.persistence.data_dir = data_dir;
    }
    if let Some(concurrency) = args.concurrency {
        config.workers.concurrency = concurrency;
    }
    if args.in_memory {
        config.persistence.backend = StoreBackend::Memory;
    }

    init_tracing(&config);
    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting job queue server with config: {:?}", config);

    let server = Server::new(config)?;

    // Handle shutdown signals
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    server.run().await?;

    Ok(())
}
