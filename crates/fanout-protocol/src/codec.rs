//! Codec for encoding and decoding fanout envelopes.
//!
//! Frames are plain JSON text. Inbound frames are size-checked before parsing.

use bytes::Bytes;
use thiserror::Error;

use crate::command::ClientCommand;
use crate::domain::DomainEvent;
use crate::event::ServerEvent;

/// Default maximum inbound frame size (4 KiB).
pub const MAX_FRAME_SIZE: usize = 4096;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The envelope or its payload is not valid JSON of the expected shape.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required payload field is missing or empty.
    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),
}

impl ProtocolError {
    /// Whether the error should end the connection rather than skip the frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }
}

/// Encode a server event into a ready-to-send text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event)?;
    Ok(Bytes::from(payload))
}

/// Codec holding the inbound size limit for one connection.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a new codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom inbound size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The inbound size limit in bytes.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a server event.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, event: &ServerEvent) -> Result<Bytes, ProtocolError> {
        encode(event)
    }

    /// Check an inbound frame against the size limit.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when the limit is exceeded.
    pub fn check_size(&self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Decode an inbound client frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large, not an envelope, or a
    /// recognised command carries an unusable payload.
    pub fn decode_command(&self, data: &[u8]) -> Result<ClientCommand, ProtocolError> {
        self.check_size(data)?;
        ClientCommand::from_slice(data)
    }

    /// Decode a message received from the external event bus.
    ///
    /// Bus messages are produced by trusted backends and are not size-limited.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a domain event envelope.
    pub fn decode_domain_event(&self, data: &[u8]) -> Result<DomainEvent, ProtocolError> {
        DomainEvent::from_slice(data)
    }
}
