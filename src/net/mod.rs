//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind; failure is fatal at startup)
//!     → HTTP upgrade (http/websocket.rs)
//!     → socket.rs (WsSocket: bounded writer channel + buffered-bytes accounting)
//!     → connection.rs (ClientId, lifecycle state machine)
//!     → Hand off to the hub
//!
//! Connection States:
//!     Connecting → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - The hub only sees the `ClientSocket` trait, never axum types
//! - Writes never block the caller; a full writer is reported as backpressure

pub mod connection;
pub mod listener;
pub mod socket;

pub use connection::{ClientId, ConnectionState, DisconnectReason, Liveness};
pub use socket::{ClientSocket, Frame, SocketError, WsSocket};
