//! Execution relay
//!
//! Real-time WebSocket fan-out of AI-agent execution events to dashboard
//! clients.
//!
//! # Architecture Overview
//!
//! ```text
//!   Execution framework                         Dashboard clients
//!          │                                          ▲
//!          ▼                                          │ JSON text frames
//!   ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//!   │ distribution │──▶│       hub        │──▶│ backpressure │
//!   │   notifier   │   │ ConnectionManager│   │ per-client   │
//!   │   + batcher  │   │   + registry     │   │   queues     │
//!   └──────────────┘   └────────▲─────────┘   └──────────────┘
//!                               │ inbound frames
//!                      ┌────────┴─────────┐
//!                      │ http / net       │◀── WebSocket upgrade
//!                      │ origin + rate    │
//!                      │ limit (security) │
//!                      └──────────────────┘
//!
//!   Cross-cutting: config (hot reload), observability, lifecycle, admin
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod protocol;

// Distribution
pub mod backpressure;
pub mod distribution;
pub mod hub;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::RelayConfig;
pub use distribution::Notifier;
pub use http::HttpServer;
pub use hub::ConnectionManager;
pub use lifecycle::Shutdown;
