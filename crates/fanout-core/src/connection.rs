//! Connection identity and the hub-side connection record.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::queue::{PushError, QueueSender};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A verified caller, as returned by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub role: String,
}

/// Immutable facts about one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: String,
    pub tenant_id: String,
    /// Display label derived from the email address.
    pub label: String,
    pub role: String,
}

impl ConnectionInfo {
    /// Build the record for a freshly authorized connection.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        let label = label_from_email(&identity.email);
        Self {
            id: ConnectionId::next(),
            user_id: identity.user_id,
            tenant_id: identity.tenant_id,
            label,
            role: identity.role,
        }
    }
}

/// The local part of an email address.
#[must_use]
pub fn label_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

/// What the hub knows about a connection: who it is and where to push frames.
#[derive(Debug)]
pub struct ConnectionHandle {
    info: Arc<ConnectionInfo>,
    queue: QueueSender,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(info: Arc<ConnectionInfo>, queue: QueueSender) -> Self {
        Self { info, queue }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub(crate) fn deliver(&self, frame: Bytes) -> Result<(), PushError> {
        self.queue.try_push(frame)
    }
}
