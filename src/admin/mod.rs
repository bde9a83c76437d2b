//! Admin API.
//!
//! Read-only JSON views of the hub behind a bearer token. Mounted only when
//! `admin.enabled` is set; the key is read from the live config on every
//! request so a reload rotates it.

pub mod auth;
pub mod handlers;

use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tower_http::timeout::TimeoutLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

#[allow(deprecated)]
pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/clients", get(get_clients))
        .route("/admin/executions", get(get_executions))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
        .layer(TimeoutLayer::new(ADMIN_TIMEOUT))
}
