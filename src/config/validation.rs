//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, fractions in range)
//! - Check that origins and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let ws = &config.websocket;
    if !ws.path.starts_with('/') {
        errors.push(ValidationError::new("websocket.path", "must start with '/'"));
    }
    for origin in &ws.allowed_origins {
        if url::Url::parse(origin).is_err() {
            errors.push(ValidationError::new(
                "websocket.allowed_origins",
                format!("'{}' is not a valid origin", origin),
            ));
        }
    }
    if ws.heartbeat_interval_ms == 0 {
        errors.push(ValidationError::new("websocket.heartbeat_interval_ms", "must be > 0"));
    }
    if ws.max_missed_heartbeats == 0 {
        errors.push(ValidationError::new("websocket.max_missed_heartbeats", "must be > 0"));
    }
    if ws.outbound_channel_capacity == 0 {
        errors.push(ValidationError::new("websocket.outbound_channel_capacity", "must be > 0"));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
        }
        if rl.max_messages == 0 {
            errors.push(ValidationError::new("rate_limit.max_messages", "must be > 0"));
        }
        if rl.burst_messages > 0 && rl.burst_window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.burst_window_ms", "must be > 0 when bursts are limited"));
        }
        if rl.violation_threshold == 0 {
            errors.push(ValidationError::new("rate_limit.violation_threshold", "must be > 0"));
        }
    }

    let bp = &config.backpressure;
    if bp.max_queue_size == 0 {
        errors.push(ValidationError::new("backpressure.max_queue_size", "must be > 0"));
    }
    if bp.max_queue_bytes == 0 {
        errors.push(ValidationError::new("backpressure.max_queue_bytes", "must be > 0"));
    }
    if !(bp.drop_threshold > 0.0 && bp.drop_threshold <= 1.0) {
        errors.push(ValidationError::new("backpressure.drop_threshold", "must be in (0, 1]"));
    }
    if bp.flush_batch_size == 0 {
        errors.push(ValidationError::new("backpressure.flush_batch_size", "must be > 0"));
    }
    if bp.flush_interval_ms == 0 {
        errors.push(ValidationError::new("backpressure.flush_interval_ms", "must be > 0"));
    }

    let batching = &config.batching;
    if batching.enabled {
        if batching.max_batch_size == 0 {
            errors.push(ValidationError::new("batching.max_batch_size", "must be > 0"));
        }
        if batching.batch_timeout_ms == 0 {
            errors.push(ValidationError::new("batching.batch_timeout_ms", "must be > 0"));
        }
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }
    if obs.stats_interval_secs == 0 {
        errors.push(ValidationError::new("observability.stats_interval_secs", "must be > 0"));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RelayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.backpressure.drop_threshold = 1.5;
        config.websocket.allowed_origins.push("::bogus::".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(errors.len(), 3);
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"backpressure.drop_threshold"));
        assert!(fields.contains(&"websocket.allowed_origins"));
    }

    #[test]
    fn disabled_rate_limit_skips_its_checks() {
        let mut config = RelayConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_messages = 0;
        assert!(validate_config(&config).is_ok());
    }
}
