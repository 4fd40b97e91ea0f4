//! In-memory transport.
//!
//! [`pair`] returns the server-side reader and writer plus a [`MemoryPeer`]
//! standing in for the remote client.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError, WireMessage};

type Inbound = Result<WireMessage, TransportError>;

/// Create a connected in-memory transport.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();
    (
        MemoryReader { rx: from_peer },
        MemoryWriter {
            tx: to_peer,
            is_open: true,
        },
        MemoryPeer {
            tx: Some(to_server),
            rx: from_server,
        },
    )
}

/// Server-side inbound half.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// Server-side outbound half.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<WireMessage>,
    is_open: bool,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(message)
            .map_err(|_| TransportError::SendFailed("peer gone".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        let _ = self.tx.send(WireMessage::Close);
        self.is_open = false;
        Ok(())
    }
}

/// The client end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryPeer {
    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the server reader is gone
    /// or the peer already hung up.
    pub fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Ok(message))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// See [`MemoryPeer::send`].
    pub fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(WireMessage::Text(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Make the server's next read fail.
    pub fn fail_reads(&self, reason: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(TransportError::ReceiveFailed(reason.to_string())));
        }
    }

    /// Make every further server write fail.
    pub fn fail_writes(&mut self) {
        self.rx.close();
    }

    /// End the inbound stream; the server reader sees a clean end.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Next message from the server, or `None` once the server writer is gone.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }
}
