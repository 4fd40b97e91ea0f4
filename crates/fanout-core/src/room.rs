//! Room abstraction for the hub.
//!
//! Rooms are named groups of connections. A room exists exactly while it has
//! at least one member; [`RoomIndex`] creates rooms on first join and deletes
//! them on last leave.

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::connection::ConnectionId;

/// Which index a room lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// One room per tenant; every connection is in exactly one.
    Tenant,
    /// One room per watched topic.
    Topic,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKind::Tenant => f.write_str("tenant"),
            RoomKind::Topic => f.write_str("topic"),
        }
    }
}

/// A set of member connections.
#[derive(Debug, Default)]
pub struct Room {
    members: HashSet<ConnectionId>,
}

impl Room {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    fn join(&mut self, id: ConnectionId) -> bool {
        self.members.insert(id)
    }

    fn leave(&mut self, id: ConnectionId) -> bool {
        self.members.remove(&id)
    }
}

/// All rooms of one kind, keyed by tenant or topic id.
#[derive(Debug)]
pub struct RoomIndex {
    kind: RoomKind,
    rooms: HashMap<String, Room>,
}

impl RoomIndex {
    #[must_use]
    pub fn new(kind: RoomKind) -> Self {
        Self {
            kind,
            rooms: HashMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&mut self, key: &str, id: ConnectionId) -> bool {
        let room = self.rooms.entry(key.to_string()).or_insert_with(|| {
            debug!(kind = %self.kind, room = %key, "Creating room");
            Room::default()
        });
        room.join(id)
    }

    /// Remove a connection from a room, deleting the room if it becomes empty.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, key: &str, id: ConnectionId) -> bool {
        let Some(room) = self.rooms.get_mut(key) else {
            return false;
        };
        let removed = room.leave(id);
        if room.is_empty() {
            self.rooms.remove(key);
            debug!(kind = %self.kind, room = %key, "Deleted empty room");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Room> {
        self.rooms.get(key)
    }

    #[must_use]
    pub fn contains_room(&self, key: &str) -> bool {
        self.rooms.contains_key(key)
    }

    #[must_use]
    pub fn member_count(&self, key: &str) -> usize {
        self.rooms.get(key).map_or(0, Room::len)
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
