//! Transport abstraction traits.
//!
//! These traits define what a session needs from a live connection, allowing
//! the server to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// An application frame (JSON text).
    Text(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness acknowledgment.
    Pong(Bytes),
    /// The peer is closing.
    Close,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Inbound message exceeds the size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next message.
    ///
    /// Returns `None` if the connection ended cleanly.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Send an application frame.
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.send(WireMessage::Text(data)).await
    }

    /// Send a liveness probe.
    async fn ping(&mut self) -> Result<(), TransportError> {
        self.send(WireMessage::Ping(Bytes::new())).await
    }

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
