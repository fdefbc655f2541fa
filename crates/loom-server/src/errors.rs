//! Error types for the send path and the wire protocol.

use thiserror::Error;

/// Why a message could not be queued for a client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The client is closed (or its writer has stopped). No I/O was attempted.
    #[error("client connection closed")]
    Closed,
    /// The outbound queue is at capacity; the message was dropped.
    #[error("send queue full, message dropped")]
    QueueFull,
}

/// A line received from a client could not be turned into a [`Message`].
///
/// [`Message`]: crate::protocol::Message
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was empty (or whitespace only).
    #[error("empty request")]
    Empty,
    /// The line was not a valid JSON message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
