//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request:
//!     → origin.rs (allow-list check, close 1008 on rejection)
//!     → hub registration
//!
//! Each inbound frame:
//!     → rate_limit.rs (sustained window, burst window, ban)
//!     → protocol parsing
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejected frame is answered with an error and never dispatched
//! - No trust in client input
//! - Both policies reload atomically without touching live connections

pub mod origin;
pub mod rate_limit;

pub use origin::OriginPolicy;
pub use rate_limit::{RateDecision, RateLimitReason, RateLimiter};
