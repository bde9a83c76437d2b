//! Distribution layer between execution producers and the hub.
//!
//! # Data Flow
//! ```text
//! Execution framework
//!     → notifier.rs (typed event methods)
//!         logs     → batcher.rs (size / timeout flush, grouped per execution)
//!         terminal → drain batcher, then send outcome
//!         others   → straight through
//!     → ConnectionManager broadcast
//! ```

pub mod batcher;
pub mod notifier;

pub use batcher::{Batcher, ExecutionBatch};
pub use notifier::Notifier;
