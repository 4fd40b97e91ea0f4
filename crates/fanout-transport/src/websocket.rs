//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a reader/writer pair.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{FrameReader, FrameWriter, TransportError, WireMessage};

/// Split an upgraded socket into its two halves.
#[must_use]
pub fn split(socket: WebSocket, max_message_size: usize) -> (WebSocketReader, WebSocketWriter) {
    let (sink, stream) = socket.split();
    (
        WebSocketReader {
            stream,
            max_message_size,
        },
        WebSocketWriter {
            sink,
            is_open: true,
        },
    )
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketReader {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(size, max = self.max_message_size, "Message too large");
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        let message = match self.stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                return Ok(None);
            }
        };

        let wire = match message {
            Message::Text(text) => {
                self.check_size(text.len())?;
                WireMessage::Text(Bytes::from(text))
            }
            // Binary frames carry the same JSON envelopes.
            Message::Binary(data) => {
                self.check_size(data.len())?;
                WireMessage::Text(Bytes::from(data))
            }
            Message::Ping(data) => WireMessage::Ping(Bytes::from(data)),
            Message::Pong(data) => WireMessage::Pong(Bytes::from(data)),
            Message::Close(_) => WireMessage::Close,
        };
        Ok(Some(wire))
    }
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    is_open: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match message {
            WireMessage::Text(data) => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                Message::Text(text)
            }
            WireMessage::Ping(data) => Message::Ping(data.to_vec()),
            WireMessage::Pong(data) => Message::Pong(data.to_vec()),
            WireMessage::Close => Message::Close(None),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        // The peer may already be gone; closing the sink still releases the socket.
        let _ = self.sink.send(Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
