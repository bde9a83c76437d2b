//! Client → server messages.
//!
//! Parsing happens in three stages so every rejection maps to one error code:
//! JSON syntax (`INVALID_MESSAGE_FORMAT`), envelope shape
//! (`INVALID_MESSAGE_STRUCTURE`), then the closed type set
//! (`UNKNOWN_MESSAGE_TYPE`).

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::codes::ErrorCode;

/// Every `type` value the service accepts.
pub const INBOUND_TYPES: [&str; 6] = [
    "ping",
    "logs:subscribe",
    "logs:unsubscribe",
    "agent:execute",
    "agent:cancel",
    "agent:status",
];

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "logs:subscribe", rename_all = "camelCase")]
    Subscribe { execution_id: String },
    #[serde(rename = "logs:unsubscribe", rename_all = "camelCase")]
    Unsubscribe { execution_id: String },
    #[serde(rename = "agent:execute")]
    AgentExecute {},
    #[serde(rename = "agent:cancel")]
    AgentCancel {},
    #[serde(rename = "agent:status")]
    AgentStatus {},
}

/// Why an inbound frame was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    InvalidFormat(#[source] serde_json::Error),
    #[error("invalid message structure: {0}")]
    InvalidStructure(String),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

impl ProtocolError {
    /// Error code sent back to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidFormat(_) => ErrorCode::InvalidMessageFormat,
            ProtocolError::InvalidStructure(_) => ErrorCode::InvalidMessageStructure,
            ProtocolError::UnknownType(_) => ErrorCode::UnknownMessageType,
        }
    }
}

impl InboundMessage {
    /// Parse and validate a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidFormat)?;
        check_envelope(&value)?;

        let message: InboundMessage = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidStructure(e.to_string()))?;

        match &message {
            InboundMessage::Subscribe { execution_id } | InboundMessage::Unsubscribe { execution_id }
                if execution_id.trim().is_empty() =>
            {
                Err(ProtocolError::InvalidStructure("'executionId' must not be empty".into()))
            }
            _ => Ok(message),
        }
    }

    /// The wire `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Ping {} => "ping",
            InboundMessage::Subscribe { .. } => "logs:subscribe",
            InboundMessage::Unsubscribe { .. } => "logs:unsubscribe",
            InboundMessage::AgentExecute {} => "agent:execute",
            InboundMessage::AgentCancel {} => "agent:cancel",
            InboundMessage::AgentStatus {} => "agent:status",
        }
    }
}

fn check_envelope(value: &Value) -> Result<(), ProtocolError> {
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidStructure("expected a JSON object".into()))?;

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(ProtocolError::InvalidStructure("'type' must be a string".into())),
        None => return Err(ProtocolError::InvalidStructure("missing 'type'".into())),
    };

    match object.get("timestamp") {
        None | Some(Value::Number(_)) | Some(Value::String(_)) => {}
        Some(_) => {
            return Err(ProtocolError::InvalidStructure(
                "'timestamp' must be a number or a string".into(),
            ))
        }
    }

    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_with_timestamp() {
        let msg = InboundMessage::parse(r#"{"type":"ping","timestamp":1700000000000}"#).unwrap();
        assert_eq!(msg, InboundMessage::Ping {});
        assert_eq!(msg.kind(), "ping");
    }

    #[test]
    fn parses_subscribe() {
        let msg = InboundMessage::parse(
            r#"{"type":"logs:subscribe","timestamp":"2024-01-01T00:00:00Z","executionId":"exec-42"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Subscribe {
                execution_id: "exec-42".into()
            }
        );
    }

    #[test]
    fn agent_types_are_accepted() {
        for kind in ["agent:execute", "agent:cancel", "agent:status"] {
            let text = format!(r#"{{"type":"{kind}","agentId":"a1"}}"#);
            let msg = InboundMessage::parse(&text).unwrap();
            assert_eq!(msg.kind(), kind);
        }
    }

    #[test]
    fn invalid_json_is_format_error() {
        let err = InboundMessage::parse("{not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessageFormat);
    }

    #[test]
    fn non_object_is_structure_error() {
        let err = InboundMessage::parse("[1,2,3]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessageStructure);
    }

    #[test]
    fn missing_or_non_string_type_is_structure_error() {
        for text in [r#"{"timestamp":1}"#, r#"{"type":7}"#] {
            let err = InboundMessage::parse(text).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidMessageStructure, "{text}");
        }
    }

    #[test]
    fn bad_timestamp_is_structure_error() {
        let err = InboundMessage::parse(r#"{"type":"ping","timestamp":{"at":1}}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessageStructure);
    }

    #[test]
    fn unknown_type_is_reported_with_name() {
        let err = InboundMessage::parse(r#"{"type":"logs:replay"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownMessageType);
        assert!(err.to_string().contains("logs:replay"));
    }

    #[test]
    fn subscribe_requires_execution_id() {
        for text in [
            r#"{"type":"logs:subscribe"}"#,
            r#"{"type":"logs:subscribe","executionId":12}"#,
            r#"{"type":"logs:unsubscribe","executionId":"  "}"#,
        ] {
            let err = InboundMessage::parse(text).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidMessageStructure, "{text}");
        }
    }
}
