//! Server → client messages.
//!
//! Every frame is a JSON object carrying `type`, `timestamp` and the
//! type-specific fields inline. Execution-scoped frames also carry
//! `executionId`. A `batch` frame wraps an ordered list of other frames.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::codes::{
    ErrorCode, Priority, PRIORITY_CRITICAL, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL,
    PRIORITY_PROGRESS,
};

/// An outbound frame: typed payload plus envelope fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub payload: OutboundPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Closed set of outbound message kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundPayload {
    #[serde(rename = "connection")]
    Connection(ConnectionInfo),
    #[serde(rename = "execution:started")]
    ExecutionStarted(ExecutionStarted),
    #[serde(rename = "execution:log")]
    ExecutionLog(LogEntry),
    #[serde(rename = "execution:progress")]
    ExecutionProgress(ProgressUpdate),
    #[serde(rename = "execution:completed")]
    ExecutionCompleted(ExecutionCompleted),
    #[serde(rename = "execution:failed")]
    ExecutionFailed(ExecutionFailed),
    #[serde(rename = "cost:updated")]
    CostUpdated(CostUpdate),
    #[serde(rename = "system:status")]
    SystemStatus(SystemStatus),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "pong")]
    Pong {},
    #[serde(rename = "batch")]
    Batch { messages: Vec<OutboundMessage> },
}

/// Sent once, right after a client is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: String,
    pub server_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStarted {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Severity of a streamed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            metadata: None,
        }
    }
}

/// Progress is a percentage in `0.0..=100.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCompleted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailed {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostUpdate {
    pub total_cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Overall health reported in `system:status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_executions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Discriminant of an outbound message, used for logging and queue bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connection,
    ExecutionStarted,
    ExecutionLog,
    ExecutionProgress,
    ExecutionCompleted,
    ExecutionFailed,
    CostUpdated,
    SystemStatus,
    Error,
    Pong,
    Batch,
}

impl MessageKind {
    /// The wire `type` string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connection => "connection",
            MessageKind::ExecutionStarted => "execution:started",
            MessageKind::ExecutionLog => "execution:log",
            MessageKind::ExecutionProgress => "execution:progress",
            MessageKind::ExecutionCompleted => "execution:completed",
            MessageKind::ExecutionFailed => "execution:failed",
            MessageKind::CostUpdated => "cost:updated",
            MessageKind::SystemStatus => "system:status",
            MessageKind::Error => "error",
            MessageKind::Pong => "pong",
            MessageKind::Batch => "batch",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutboundMessage {
    /// A message that is not tied to an execution.
    pub fn new(payload: OutboundPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            execution_id: None,
        }
    }

    /// A message scoped to one execution.
    pub fn for_execution(execution_id: impl Into<String>, payload: OutboundPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            execution_id: Some(execution_id.into()),
        }
    }

    pub fn connection(client_id: impl Into<String>) -> Self {
        Self::new(OutboundPayload::Connection(ConnectionInfo {
            client_id: client_id.into(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    pub fn pong() -> Self {
        Self::new(OutboundPayload::Pong {})
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::new(OutboundPayload::Error(ErrorPayload {
            code,
            message: message.into(),
            retry_after_ms,
        }))
    }

    /// Wrap several messages for one execution into a single `batch` frame.
    pub fn batch(execution_id: impl Into<String>, messages: Vec<OutboundMessage>) -> Self {
        Self::for_execution(execution_id, OutboundPayload::Batch { messages })
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            OutboundPayload::Connection(_) => MessageKind::Connection,
            OutboundPayload::ExecutionStarted(_) => MessageKind::ExecutionStarted,
            OutboundPayload::ExecutionLog(_) => MessageKind::ExecutionLog,
            OutboundPayload::ExecutionProgress(_) => MessageKind::ExecutionProgress,
            OutboundPayload::ExecutionCompleted(_) => MessageKind::ExecutionCompleted,
            OutboundPayload::ExecutionFailed(_) => MessageKind::ExecutionFailed,
            OutboundPayload::CostUpdated(_) => MessageKind::CostUpdated,
            OutboundPayload::SystemStatus(_) => MessageKind::SystemStatus,
            OutboundPayload::Error(_) => MessageKind::Error,
            OutboundPayload::Pong {} => MessageKind::Pong,
            OutboundPayload::Batch { .. } => MessageKind::Batch,
        }
    }

    /// Default delivery priority. A batch inherits its highest member.
    pub fn priority(&self) -> Priority {
        match &self.payload {
            OutboundPayload::ExecutionLog(_) => PRIORITY_LOW,
            OutboundPayload::ExecutionProgress(_) => PRIORITY_PROGRESS,
            OutboundPayload::ExecutionStarted(_)
            | OutboundPayload::CostUpdated(_)
            | OutboundPayload::SystemStatus(_) => PRIORITY_NORMAL,
            OutboundPayload::Connection(_) | OutboundPayload::Pong {} => PRIORITY_HIGH,
            OutboundPayload::Error(_)
            | OutboundPayload::ExecutionCompleted(_)
            | OutboundPayload::ExecutionFailed(_) => PRIORITY_CRITICAL,
            OutboundPayload::Batch { messages } => messages
                .iter()
                .map(OutboundMessage::priority)
                .max()
                .unwrap_or(PRIORITY_LOW),
        }
    }

    /// Completion and failure end an execution's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            OutboundPayload::ExecutionCompleted(_) | OutboundPayload::ExecutionFailed(_)
        )
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
