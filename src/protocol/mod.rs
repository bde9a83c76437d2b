//! Wire protocol.
//!
//! # Data Flow
//! ```text
//! Inbound text frame
//!     → inbound.rs (JSON → envelope check → InboundMessage)
//!     → hub dispatch
//!
//! Notifier / hub
//!     → outbound.rs (OutboundMessage → JSON text frame)
//!     → backpressure queue → socket
//! ```
//!
//! # Design Decisions
//! - Both directions are closed enums; unknown types are rejected, never forwarded
//! - Priorities live next to the message kinds they classify

pub mod codes;
pub mod inbound;
pub mod outbound;

pub use codes::{ErrorCode, Priority};
pub use inbound::{InboundMessage, ProtocolError};
pub use outbound::{MessageKind, OutboundMessage, OutboundPayload};
