//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → cloned into each subsystem at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → HttpServer applies the hot-reloadable parts
//!       (rate limits, origin allow-list) via atomic swap
//! ```
//!
//! # Design Decisions
//! - Only rate limits and allowed origins change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, BackpressureConfig, BatchingConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RateLimitConfig, RelayConfig, WebSocketConfig,
};
