//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (connections, inbound traffic, drops, batches)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `relay_connections_total` (counter): accepted connections
//! - `relay_connections_rejected_total` (counter): refused upgrades by reason
//! - `relay_disconnections_total` (counter): closed connections by reason
//! - `relay_connection_duration_seconds` (histogram): connection lifetime
//! - `relay_inbound_messages_total` / `relay_inbound_bytes_total` (counters)
//! - `relay_rate_limited_total` (counter): rejections by reason
//! - `relay_protocol_errors_total` (counter): rejected frames by error code
//! - `relay_messages_dropped_total` (counter): outbound drops by reason
//! - `relay_batches_flushed_total` (counter) and `relay_batch_size` (histogram)
//! - `relay_active_clients`, `relay_active_executions`, `relay_queued_messages` (gauges)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels are static strings to keep cardinality bounded

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "relay_connections_rejected_total";
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
pub const CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
pub const INBOUND_MESSAGES_TOTAL: &str = "relay_inbound_messages_total";
pub const INBOUND_BYTES_TOTAL: &str = "relay_inbound_bytes_total";
pub const RATE_LIMITED_TOTAL: &str = "relay_rate_limited_total";
pub const PROTOCOL_ERRORS_TOTAL: &str = "relay_protocol_errors_total";
pub const MESSAGES_DROPPED_TOTAL: &str = "relay_messages_dropped_total";
pub const BATCHES_FLUSHED_TOTAL: &str = "relay_batches_flushed_total";
pub const BATCH_SIZE: &str = "relay_batch_size";
pub const ACTIVE_CLIENTS: &str = "relay_active_clients";
pub const ACTIVE_EXECUTIONS: &str = "relay_active_executions";
pub const QUEUED_MESSAGES: &str = "relay_queued_messages";

/// Install the global Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to start metrics endpoint"),
    }
}

pub fn record_connection_opened() {
    counter!(CONNECTIONS_TOTAL).increment(1);
}

pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_connection_closed(reason: &'static str, duration_secs: f64) {
    counter!(DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

pub fn record_inbound(bytes: usize) {
    counter!(INBOUND_MESSAGES_TOTAL).increment(1);
    counter!(INBOUND_BYTES_TOTAL).increment(bytes as u64);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!(RATE_LIMITED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_protocol_error(code: &'static str) {
    counter!(PROTOCOL_ERRORS_TOTAL, "code" => code).increment(1);
}

pub fn record_messages_dropped(reason: &'static str, count: u64) {
    counter!(MESSAGES_DROPPED_TOTAL, "reason" => reason).increment(count);
}

pub fn record_batch_flushed(size: usize) {
    counter!(BATCHES_FLUSHED_TOTAL).increment(1);
    histogram!(BATCH_SIZE).record(size as f64);
}

pub fn set_active_clients(count: usize) {
    gauge!(ACTIVE_CLIENTS).set(count as f64);
}

pub fn set_active_executions(count: usize) {
    gauge!(ACTIVE_EXECUTIONS).set(count as f64);
}

pub fn set_queued_messages(count: usize) {
    gauge!(QUEUED_MESSAGES).set(count as f64);
}
