//! Error taxonomy for the signaling relay.
//!
//! Every variant carries the exact string a peer observes in an `error`
//! envelope (see protocol::ServerMessage::Error). Handlers never fail the
//! connection for these; liveness/admission failures are the only things
//! that close a transport, and those are handled outside this type.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Room is full")]
    RoomFull,

    #[error("Server is at capacity")]
    Capacity,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Target peer not found")]
    TargetNotFound,

    #[error("Message too large")]
    PayloadTooLarge,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Message type is required")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Internal server error")]
    Internal,
}

impl RelayError {
    /// The string that goes on the wire inside `{"type":"error","error":...}`.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}
