//! Client identity and connection state machine.
//!
//! # Responsibilities
//! - Generate unique, opaque client IDs for routing and tracing
//! - Model the per-connection lifecycle and heartbeat liveness
//!
//! # State Machine
//! ```text
//! Connecting → Open → Closing → Closed
//!                │                 ▲
//!                └─────────────────┘  (missed heartbeat / socket error)
//!
//! While Open, liveness toggles each heartbeat tick:
//!     Alive → AwaitingPong → (pong) → Alive
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a new unique client ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Accepted, state being initialized.
    Connecting,
    /// Registered and receiving traffic.
    Open,
    /// Close frame sent, waiting for the peer.
    Closing,
    /// Cleaned up.
    Closed,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

/// Heartbeat liveness of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Responded since the last heartbeat tick.
    Alive,
    /// Pinged, no response yet.
    AwaitingPong,
}

/// Why a client left the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer sent a close frame or the stream ended.
    ClientClosed,
    /// Transport error on read or write.
    SocketError(String),
    /// Missed too many heartbeats.
    HeartbeatTimeout,
    /// Server shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::SocketError(_) => "socket_error",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::SocketError(e) => write!(f, "socket_error: {}", e),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let id1 = ClientId::new();
        let id2 = ClientId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("client-"));
    }

    #[test]
    fn client_id_serializes_as_bare_uuid() {
        let id = ClientId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }

    #[test]
    fn state_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Open.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closing.can_transition_to(Open));
    }

    #[test]
    fn disconnect_reason_labels() {
        assert_eq!(DisconnectReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
        let reason = DisconnectReason::SocketError("reset".into());
        assert_eq!(reason.as_str(), "socket_error");
        assert_eq!(reason.to_string(), "socket_error: reset");
    }
}
