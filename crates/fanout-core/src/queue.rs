//! Per-connection delivery queue.
//!
//! The queue has exactly one producer (the hub, through the connection's
//! registry record) and one consumer (the session's outbound loop). Dropping
//! the [`QueueSender`] closes the queue: the consumer drains what is left and
//! then observes the end of the stream.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Default number of frames a connection may have pending.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Why a non-blocking push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The consumer is not keeping up.
    Full,
    /// The consumer is gone.
    Closed,
}

/// Create a bounded delivery queue.
///
/// A capacity of zero is rounded up to one.
#[must_use]
pub fn delivery_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer half. Deliberately not `Clone`.
#[derive(Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<Bytes>,
}

impl QueueSender {
    /// Push a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] if the queue is at capacity and
    /// [`PushError::Closed`] if the receiver was dropped.
    pub fn try_push(&self, frame: Bytes) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Maximum number of pending frames.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of frames currently pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the outbound loop.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl QueueReceiver {
    /// Wait for the next frame. Returns `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next frame if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let (tx, mut rx) = delivery_queue(2);
        assert_eq!(tx.capacity(), 2);

        assert!(tx.try_push(Bytes::from_static(b"a")).is_ok());
        assert!(tx.try_push(Bytes::from_static(b"b")).is_ok());
        assert_eq!(tx.pending(), 2);
        assert_eq!(tx.try_push(Bytes::from_static(b"c")), Err(PushError::Full));

        assert_eq!(rx.try_recv().as_deref(), Some(&b"a"[..]));
        assert!(tx.try_push(Bytes::from_static(b"c")).is_ok());
    }

    #[test]
    fn test_closed_when_receiver_dropped() {
        let (tx, rx) = delivery_queue(4);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.try_push(Bytes::new()), Err(PushError::Closed));
    }

    #[tokio::test]
    async fn test_receiver_drains_then_ends() {
        let (tx, mut rx) = delivery_queue(4);
        tx.try_push(Bytes::from_static(b"last")).unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.as_deref(), Some(&b"last"[..]));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let (tx, _rx) = delivery_queue(0);
        assert_eq!(tx.capacity(), 1);
    }
}
