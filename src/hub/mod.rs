//! Connection hub.
//!
//! # Data Flow
//! ```text
//! WebSocket reader task
//!     → manager.rs (activity, rate limit, parse, dispatch)
//!     → registry.rs (client table + execution → subscribers index)
//!
//! Notifier / broadcast
//!     → manager.rs (serialize once, pick targets under the registry lock)
//!     → backpressure (per-client send or queue)
//!
//! maintenance.rs timers
//!     → heartbeat_tick / flush_all / rate sweep / stats
//! ```
//!
//! # Design Decisions
//! - The manager is an explicitly constructed service shared through `Arc`
//! - Every timer lives in one maintenance task tied to the shutdown signal

pub mod client;
pub mod maintenance;
pub mod manager;
pub mod registry;

pub use client::{Client, ClientCounters, ClientSnapshot};
pub use maintenance::{run_maintenance, MaintenanceSchedule};
pub use manager::{ConnectionManager, ExecutionSnapshot, HeartbeatReport, HubError, HubStats};
pub use registry::Registry;
