//! Outbound backpressure.
//!
//! # Data Flow
//! ```text
//! hub send / broadcast (frame serialized once)
//!     → handler.rs (direct send, or queue when the socket is backed up)
//!     → queue.rs (priority order, count + byte bounds, eviction)
//!     → flush on writer drain or periodic sweep
//! ```

pub mod handler;
pub mod queue;

pub use handler::{BackpressureHandler, BackpressureStats, ClientQueueStats};
pub use queue::{MessageQueue, QueuedMessage};
