//! HTTP and WebSocket surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, background tasks, shutdown)
//!         GET /health        → health JSON
//!         GET /admin/*       → admin API (bearer token)
//!         GET {ws path}      → websocket.rs (origin check, upgrade)
//!             → reader task  → ConnectionManager
//!             → writer task  ← WsSocket channel
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, HttpServer};
pub use websocket::ws_handler;
