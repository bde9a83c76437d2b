use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use execution_relay::config::loader::load_config;
use execution_relay::config::watcher::ConfigWatcher;
use execution_relay::lifecycle::wait_for_signal;
use execution_relay::net::listener::bind_listener;
use execution_relay::observability::{logging, metrics};
use execution_relay::{HttpServer, RelayConfig, Shutdown};

#[derive(Parser)]
#[command(name = "execution-relay")]
#[command(about = "Real-time WebSocket relay for agent execution events", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for changes when given.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "execution-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        path = %config.websocket.path,
        allowed_origins = ?config.websocket.allowed_origins,
        "Configuration loaded"
    );

    let listener = match bind_listener(&config.listener).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind listener");
            return Err(e.into());
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when its handle is dropped.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    let server = HttpServer::new(config);
    server.run(listener, config_updates, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
