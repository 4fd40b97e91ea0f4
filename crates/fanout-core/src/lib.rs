//! # fanout-core
//!
//! Membership, routing and event translation for the fanout realtime hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Queue** - Bounded per-connection delivery queue
//! - **Room** - Tenant and topic membership indices
//! - **Hub** - Single-writer actor that owns membership and routes broadcasts
//! - **Bridge** - Translates external domain events into room broadcasts
//! - **Store** - Presence and viewer-set collaborator interfaces
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register/join   ┌─────────────┐   try_push   ┌──────────────┐
//! │   Session   │─────────────────▶│     Hub     │─────────────▶│ DeliveryQueue│
//! └─────────────┘                  └─────────────┘              └──────────────┘
//!                                         ▲
//!                                         │ broadcast
//!                                  ┌─────────────┐
//!                                  │   Bridge    │◀── external event bus
//!                                  └─────────────┘
//! ```

pub mod bridge;
pub mod connection;
pub mod hub;
pub mod message;
pub mod queue;
pub mod room;
pub mod store;

pub use bridge::{Bridge, BridgeError, BridgeExit, Resubscribe};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionInfo, Identity};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use message::{BroadcastMessage, Target};
pub use queue::{delivery_queue, PushError, QueueReceiver, QueueSender};
pub use room::{Room, RoomIndex, RoomKind};
pub use store::{MemoryStore, PresenceStore, StoreError, StoreHealth, ViewerStore};
