//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router (WebSocket endpoint, health, admin API)
//! - Own the hub, the notifier and the hot-reloadable policies
//! - Spawn the background tasks tied to the shutdown signal
//! - Close every client once the listener has stopped

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::admin::setup_admin_router;
use crate::config::RelayConfig;
use crate::distribution::Notifier;
use crate::http::websocket::ws_handler;
use crate::hub::{run_maintenance, ConnectionManager, MaintenanceSchedule};
use crate::lifecycle::Shutdown;
use crate::security::OriginPolicy;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub notifier: Arc<Notifier>,
    pub origins: Arc<OriginPolicy>,
    pub config: Arc<ArcSwap<RelayConfig>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let manager = Arc::new(ConnectionManager::new(&config));
        let notifier = Arc::new(Notifier::new(manager.clone(), &config.batching));
        Self {
            origins: Arc::new(OriginPolicy::new(&config.websocket)),
            manager,
            notifier,
            config: Arc::new(ArcSwap::from_pointee(config)),
            start_time: Instant::now(),
        }
    }

    /// Swap in a reloaded config. Live connections keep running.
    pub fn apply_config(&self, config: RelayConfig) {
        self.manager.apply_config(&config);
        self.origins.update(&config.websocket);
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
    pub executions: usize,
}

/// HTTP server for the execution relay.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: RelayConfig) -> Self {
        let state = AppState::new(config);
        let router = Self::build_router(&state);
        Self { router, state }
    }

    fn build_router(state: &AppState) -> Router {
        let config = state.config.load();
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route(&config.websocket.path, get(ws_handler));

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
        }

        router
            .with_state(state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Producer-facing entry point for execution events.
    pub fn notifier(&self) -> Arc<Notifier> {
        self.state.notifier.clone()
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.state.manager.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then close every client connection.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.load_full();
        tracing::info!(
            address = %addr,
            path = %config.websocket.path,
            admin = config.admin.enabled,
            "Execution relay listening"
        );

        let maintenance = tokio::spawn(run_maintenance(
            self.state.manager.clone(),
            MaintenanceSchedule::from_config(&config),
            shutdown.subscribe(),
        ));
        let flusher = tokio::spawn(self.state.notifier.clone().run_flush_loop(shutdown.subscribe()));
        tokio::spawn(apply_config_updates(
            self.state.clone(),
            config_updates,
            shutdown.subscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Listener stopped accepting connections");
            })
            .await?;

        for task in [maintenance, flusher] {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        let timeout = Duration::from_millis(config.websocket.close_timeout_ms);
        self.state.manager.shutdown(timeout).await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn apply_config_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<RelayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            update = updates.recv() => match update {
                Some(config) => state.apply_config(config),
                None => break,
            },
        }
    }
}

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        connections: state.manager.client_count(),
        executions: state.manager.execution_count(),
    })
}
