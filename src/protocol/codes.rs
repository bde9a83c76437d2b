//! Error codes and delivery priorities.

use serde::{Deserialize, Serialize};

/// Structured error codes sent to a misbehaving client.
///
/// None of these close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame is not valid JSON.
    InvalidMessageFormat,
    /// JSON does not match the envelope shape.
    InvalidMessageStructure,
    /// Inbound rate or burst limit exceeded (carries `retryAfterMs`).
    RateLimitExceeded,
    /// `type` is outside the inbound set.
    UnknownMessageType,
    /// Accepted type that this service does not act on.
    NotImplemented,
}

impl ErrorCode {
    /// Wire representation, also used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessageFormat => "INVALID_MESSAGE_FORMAT",
            ErrorCode::InvalidMessageStructure => "INVALID_MESSAGE_STRUCTURE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound delivery priority. Higher is delivered first.
pub type Priority = u8;

/// Log lines.
pub const PRIORITY_LOW: Priority = 1;
/// Progress updates.
pub const PRIORITY_PROGRESS: Priority = 3;
/// Lifecycle and cost events.
pub const PRIORITY_NORMAL: Priority = 5;
/// Connection handshake and pong.
pub const PRIORITY_HIGH: Priority = 8;
/// Errors and terminal execution outcomes.
pub const PRIORITY_CRITICAL: Priority = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, r#""RATE_LIMIT_EXCEEDED""#);
        for code in [
            ErrorCode::InvalidMessageFormat,
            ErrorCode::InvalidMessageStructure,
            ErrorCode::RateLimitExceeded,
            ErrorCode::UnknownMessageType,
            ErrorCode::NotImplemented,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn priorities_are_ordered() {
        assert!(PRIORITY_LOW < PRIORITY_PROGRESS);
        assert!(PRIORITY_PROGRESS < PRIORITY_NORMAL);
        assert!(PRIORITY_NORMAL < PRIORITY_HIGH);
        assert!(PRIORITY_HIGH < PRIORITY_CRITICAL);
    }
}
