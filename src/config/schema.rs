//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the execution relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// WebSocket endpoint, origin policy and heartbeat settings.
    pub websocket: WebSocketConfig,

    /// Inbound rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Outbound per-client queueing.
    pub backpressure: BackpressureConfig,

    /// Log batching for the distribution layer.
    pub batching: BatchingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrently registered WebSocket clients.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// WebSocket endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Path the upgrade is served on.
    pub path: String,

    /// Origins allowed to open a connection. Empty allows every origin.
    pub allowed_origins: Vec<String>,

    /// Accept upgrades that carry no `Origin` header (non-browser clients).
    pub allow_missing_origin: bool,

    /// Heartbeat sweep interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Consecutive unanswered heartbeats before a client is terminated.
    pub max_missed_heartbeats: u32,

    /// How long a deliberate close waits for the peer before forcing it.
    pub close_timeout_ms: u64,

    /// Bytes the writer may hold before the socket reports buffered output.
    pub write_buffer_bytes: usize,

    /// Frames the per-connection writer channel can hold.
    pub outbound_channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            allow_missing_origin: true,
            heartbeat_interval_ms: 30_000,
            max_missed_heartbeats: 1,
            close_timeout_ms: 5_000,
            write_buffer_bytes: 64 * 1024,
            outbound_channel_capacity: 1024,
        }
    }
}

/// Inbound rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Length of the sustained window in milliseconds.
    pub window_ms: u64,

    /// Messages allowed per sustained window.
    pub max_messages: u32,

    /// Bytes allowed per sustained window.
    pub max_bytes: u64,

    /// Length of the burst window in milliseconds.
    pub burst_window_ms: u64,

    /// Messages allowed per burst window (0 disables the burst check).
    pub burst_messages: u32,

    /// Rejections before a temporary ban.
    pub violation_threshold: u32,

    /// Ban length in milliseconds.
    pub ban_duration_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_messages: 120,
            max_bytes: 1024 * 1024,
            burst_window_ms: 1_000,
            burst_messages: 20,
            violation_threshold: 10,
            ban_duration_ms: 300_000,
        }
    }
}

/// Outbound queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Maximum queued messages per client.
    pub max_queue_size: usize,

    /// Maximum queued bytes per client.
    pub max_queue_bytes: usize,

    /// Priority at or above which messages are never dropped for capacity.
    pub priority_threshold: u8,

    /// Utilization fraction above which the queue counts as saturated.
    pub drop_threshold: f64,

    /// Messages sent per flush.
    pub flush_batch_size: usize,

    /// Send attempts after the first failure.
    pub max_retries: u32,

    /// Periodic flush sweep interval in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_queue_bytes: 5 * 1024 * 1024,
            priority_threshold: 10,
            drop_threshold: 0.8,
            flush_batch_size: 50,
            max_retries: 3,
            flush_interval_ms: 100,
        }
    }
}

/// Log batching configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    /// Buffer logs instead of sending them one by one.
    pub enabled: bool,

    /// Buffered messages that trigger an immediate flush.
    pub max_batch_size: usize,

    /// Milliseconds after the first buffered message before a flush.
    pub batch_timeout_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 25,
            batch_timeout_ms: 100,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Interval between stats log lines, in seconds.
    pub stats_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            stats_interval_secs: 60,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [rate_limit]
            max_messages = 30

            [websocket]
            allowed_origins = ["https://dash.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_messages, 30);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.websocket.allowed_origins, vec!["https://dash.example.com"]);
        assert_eq!(config.websocket.path, "/ws");
        assert_eq!(config.batching.max_batch_size, 25);
    }

    #[test]
    fn log_format_parses_lowercase() {
        let config: ObservabilityConfig = toml::from_str(r#"log_format = "json""#).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
