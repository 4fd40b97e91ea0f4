//! # fanout-protocol
//!
//! Wire protocol definitions for the fanout realtime hub.
//!
//! Everything on the wire is a JSON envelope of the shape `{"event": .., "data": ..}`.
//! This crate turns those envelopes into closed enumerations at the boundary:
//!
//! - [`ClientCommand`] - what a connected client may ask for
//! - [`ServerEvent`] - what the hub pushes to clients
//! - [`DomainEvent`] - what the backend publishes on the external event bus
//!
//! Unknown event names never fail decoding; they map to an `Ignored` variant.
//!
//! ## Example
//!
//! ```rust
//! use fanout_protocol::{ClientCommand, FrameCodec};
//!
//! let codec = FrameCodec::new();
//! let cmd = codec
//!     .decode_command(br#"{"event":"topic:join","data":{"topicId":"K9"}}"#)
//!     .unwrap();
//! assert_eq!(cmd, ClientCommand::JoinTopic { topic_id: "K9".into() });
//! ```

pub mod codec;
pub mod command;
pub mod domain;
pub mod event;

pub use codec::{encode, FrameCodec, ProtocolError, MAX_FRAME_SIZE};
pub use command::ClientCommand;
pub use domain::DomainEvent;
pub use event::{AgentPresence, PresenceList, ServerEvent, TicketMerge, TypingIndicator, ViewerList};
