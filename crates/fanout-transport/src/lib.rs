//! # fanout-transport
//!
//! Transport abstraction layer for the fanout realtime hub.
//!
//! A live connection is split into a [`FrameReader`] and a [`FrameWriter`] so
//! that the inbound and outbound loops of a session can run independently:
//!
//! - **WebSocket** - axum upgrade, the production transport
//! - **Memory** - in-process duplex pair for tests and tooling
//!
//! ```rust,ignore
//! use fanout_transport::{FrameReader, WireMessage};
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(message)) = reader.recv().await {
//!         if message == WireMessage::Close {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError, WireMessage};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReader, WebSocketWriter};
