use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::hub::{ClientSnapshot, ExecutionSnapshot, HubStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub hub: HubStats,
    pub pending_batches: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.uptime().as_secs(),
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        hub: state.manager.stats(),
        pending_batches: state.notifier.pending(),
    })
}

pub async fn get_clients(State(state): State<AppState>) -> Json<Vec<ClientSnapshot>> {
    Json(state.manager.client_snapshots())
}

pub async fn get_executions(State(state): State<AppState>) -> Json<Vec<ExecutionSnapshot>> {
    Json(state.manager.execution_snapshots())
}
