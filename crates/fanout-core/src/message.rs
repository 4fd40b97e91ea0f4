//! Addressed broadcast messages.

use bytes::Bytes;
use fanout_protocol::{codec, ProtocolError, ServerEvent};

use crate::connection::ConnectionId;

/// Who a broadcast is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every connection of a tenant.
    Tenant(String),
    /// Every connection watching a topic.
    Topic(String),
    /// A single connection. Used for direct replies.
    Connection(ConnectionId),
}

/// An already-serialized frame plus its destination.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub target: Target,
    /// Encoded frame, shared between all recipients.
    pub payload: Bytes,
    /// Event name, for logging.
    pub event: Option<&'static str>,
}

impl BroadcastMessage {
    #[must_use]
    pub fn new(target: Target, payload: impl Into<Bytes>) -> Self {
        Self {
            target,
            payload: payload.into(),
            event: None,
        }
    }

    /// Encode a server event for the given target.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn encode(target: Target, event: &ServerEvent) -> Result<Self, ProtocolError> {
        let payload = codec::encode(event)?;
        Ok(Self {
            target,
            payload,
            event: Some(event.name()),
        })
    }

    #[must_use]
    pub fn to_tenant(tenant_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Target::Tenant(tenant_id.into()), payload)
    }

    #[must_use]
    pub fn to_topic(topic_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Target::Topic(topic_id.into()), payload)
    }

    /// Same payload, different destination.
    #[must_use]
    pub fn retarget(&self, target: Target) -> Self {
        Self {
            target,
            payload: self.payload.clone(),
            event: self.event,
        }
    }
}
