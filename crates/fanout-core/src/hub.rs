//! The hub: single owner of all membership state.
//!
//! Every mutation of the registry and the room indices happens inside
//! [`Hub::run`], which drains one ordered inbox. Callers talk to it through a
//! cloneable [`HubHandle`]. Because there is exactly one writer, the global
//! registry, the tenant index and the topic index can never disagree, and a
//! broadcast always sees membership as of its position in the inbox.
//!
//! Fanout never waits on a consumer: a member whose delivery queue is full is
//! evicted on the spot.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::message::{BroadcastMessage, Target};
use crate::queue::PushError;
use crate::room::{RoomIndex, RoomKind};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The hub has shut down and accepts no more operations.
    #[error("Hub is shut down")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of pending operations the inbox holds before callers wait.
    pub inbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 4096,
        }
    }
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Live tenant rooms.
    pub tenant_rooms: usize,
    /// Live topic rooms.
    pub topic_rooms: usize,
    /// Non-blocking enqueue attempts since start.
    pub delivery_attempts: u64,
    /// Connections evicted for not keeping up.
    pub evictions: u64,
}

enum Command {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    JoinTopic {
        connection: ConnectionId,
        topic: String,
    },
    LeaveTopic {
        connection: ConnectionId,
        topic: String,
    },
    Broadcast(BroadcastMessage),
    Stats(oneshot::Sender<HubStats>),
    Members {
        kind: RoomKind,
        key: String,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    Shutdown,
}

/// Cloneable entry point to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    inbox: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn submit(&self, command: Command) -> Result<(), HubError> {
        self.inbox.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Add a connection to the registry and its tenant room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown; the handle is dropped,
    /// which closes its delivery queue.
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), HubError> {
        self.submit(Command::Register(connection)).await
    }

    /// Remove a connection from every room and close its delivery queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn unregister(&self, connection: ConnectionId) -> Result<(), HubError> {
        self.submit(Command::Unregister(connection)).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn join_topic(
        &self,
        connection: ConnectionId,
        topic: impl Into<String>,
    ) -> Result<(), HubError> {
        self.submit(Command::JoinTopic {
            connection,
            topic: topic.into(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn leave_topic(
        &self,
        connection: ConnectionId,
        topic: impl Into<String>,
    ) -> Result<(), HubError> {
        self.submit(Command::LeaveTopic {
            connection,
            topic: topic.into(),
        })
        .await
    }

    /// Route a message to every member of its target.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn broadcast(&self, message: BroadcastMessage) -> Result<(), HubError> {
        self.submit(Command::Broadcast(message)).await
    }

    /// Current statistics, ordered after every operation submitted before it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Members of one room, sorted by id. Empty if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn members(
        &self,
        kind: RoomKind,
        key: impl Into<String>,
    ) -> Result<Vec<ConnectionId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Members {
            kind,
            key: key.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Close every delivery queue and stop the hub.
    ///
    /// Operations already in the inbox are processed first.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub already stopped.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.submit(Command::Shutdown).await
    }

    /// Whether the hub loop has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

struct Member {
    connection: ConnectionHandle,
    topics: HashSet<String>,
}

/// The membership and routing actor.
pub struct Hub {
    inbox: mpsc::Receiver<Command>,
    registry: HashMap<ConnectionId, Member>,
    tenants: RoomIndex,
    topics: RoomIndex,
    delivery_attempts: u64,
    evictions: u64,
}

impl Hub {
    /// Create a hub and its handle without starting it.
    #[must_use]
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
        let hub = Self {
            inbox: rx,
            registry: HashMap::new(),
            tenants: RoomIndex::new(RoomKind::Tenant),
            topics: RoomIndex::new(RoomKind::Topic),
            delivery_attempts: 0,
            evictions: 0,
        };
        (hub, HubHandle { inbox: tx })
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Drain the inbox until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(command) = self.inbox.recv().await {
            if !self.handle(command) {
                break;
            }
        }

        self.inbox.close();
        let closed = self.registry.len();
        self.registry.clear();
        self.tenants = RoomIndex::new(RoomKind::Tenant);
        self.topics = RoomIndex::new(RoomKind::Topic);

        info!(connections = closed, "Hub stopped");
    }

    /// Apply one command. Returns `false` when the loop should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Register(connection) => self.register(connection),
            Command::Unregister(id) => {
                if self.remove(id) {
                    debug!(connection = %id, "Connection unregistered");
                }
            }
            Command::JoinTopic { connection, topic } => self.join_topic(connection, topic),
            Command::LeaveTopic { connection, topic } => self.leave_topic(connection, &topic),
            Command::Broadcast(message) => self.broadcast(&message),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Members { kind, key, reply } => {
                let _ = reply.send(self.members(kind, &key));
            }
            Command::Shutdown => {
                debug!("Hub shutdown requested");
                return false;
            }
        }
        true
    }

    fn register(&mut self, connection: ConnectionHandle) {
        let id = connection.id();
        let tenant = connection.info().tenant_id.clone();

        self.tenants.join(&tenant, id);
        self.registry.insert(
            id,
            Member {
                connection,
                topics: HashSet::new(),
            },
        );

        debug!(
            connection = %id,
            tenant = %tenant,
            members = self.tenants.member_count(&tenant),
            "Connection registered"
        );
    }

    fn join_topic(&mut self, id: ConnectionId, topic: String) {
        let Some(member) = self.registry.get_mut(&id) else {
            trace!(connection = %id, topic = %topic, "Join from unregistered connection");
            return;
        };
        self.topics.join(&topic, id);
        debug!(connection = %id, topic = %topic, "Joined topic");
        member.topics.insert(topic);
    }

    fn leave_topic(&mut self, id: ConnectionId, topic: &str) {
        if let Some(member) = self.registry.get_mut(&id) {
            member.topics.remove(topic);
        }
        if self.topics.leave(topic, id) {
            debug!(connection = %id, topic = %topic, "Left topic");
        }
    }

    /// Drop a connection from the registry and all rooms.
    ///
    /// Dropping the record drops the queue's only sender, which closes it.
    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(member) = self.registry.remove(&id) else {
            return false;
        };
        self.tenants.leave(&member.connection.info().tenant_id, id);
        for topic in &member.topics {
            self.topics.leave(topic, id);
        }
        true
    }

    fn broadcast(&mut self, message: &BroadcastMessage) {
        let mut stalled = Vec::new();

        let attempts = match &message.target {
            Target::Tenant(key) => match self.tenants.get(key) {
                Some(room) => deliver_all(room.members(), &self.registry, message, &mut stalled),
                None => 0,
            },
            Target::Topic(key) => match self.topics.get(key) {
                Some(room) => deliver_all(room.members(), &self.registry, message, &mut stalled),
                None => 0,
            },
            Target::Connection(id) => {
                deliver_all(std::iter::once(*id), &self.registry, message, &mut stalled)
            }
        };

        self.delivery_attempts += attempts;
        trace!(
            destination = ?message.target,
            event = message.event.unwrap_or("-"),
            recipients = attempts,
            "Broadcast routed"
        );

        for (id, reason) in stalled {
            if self.remove(id) {
                self.evictions += 1;
                match reason {
                    PushError::Full => info!(connection = %id, "Evicted slow consumer"),
                    PushError::Closed => debug!(connection = %id, "Evicted closed consumer"),
                }
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            tenant_rooms: self.tenants.len(),
            topic_rooms: self.topics.len(),
            delivery_attempts: self.delivery_attempts,
            evictions: self.evictions,
        }
    }

    fn members(&self, kind: RoomKind, key: &str) -> Vec<ConnectionId> {
        let index = match kind {
            RoomKind::Tenant => &self.tenants,
            RoomKind::Topic => &self.topics,
        };
        let mut ids: Vec<_> = index
            .get(key)
            .map(|room| room.members().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

/// Push one payload to each listed member without waiting.
///
/// Returns the number of enqueue attempts; refused members go into `stalled`.
fn deliver_all(
    ids: impl Iterator<Item = ConnectionId>,
    registry: &HashMap<ConnectionId, Member>,
    message: &BroadcastMessage,
    stalled: &mut Vec<(ConnectionId, PushError)>,
) -> u64 {
    let mut attempts = 0;
    for id in ids {
        let Some(member) = registry.get(&id) else {
            continue;
        };
        attempts += 1;
        if let Err(reason) = member.connection.deliver(message.payload.clone()) {
            stalled.push((id, reason));
        }
    }
    attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionInfo, Identity};
    use crate::queue::{delivery_queue, QueueReceiver};
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    fn connection(tenant: &str, capacity: usize) -> (ConnectionHandle, QueueReceiver) {
        let info = ConnectionInfo::new(Identity {
            user_id: "user".into(),
            tenant_id: tenant.into(),
            email: "user@example.com".into(),
            role: "agent".into(),
        });
        let (tx, rx) = delivery_queue(capacity);
        (ConnectionHandle::new(Arc::new(info), tx), rx)
    }

    #[tokio::test]
    async fn test_register_unregister_tenant_membership() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (a, _rx_a) = connection("t1", 8);
        let (b, _rx_b) = connection("t1", 8);
        let (a_id, b_id) = (a.id(), b.id());

        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        let mut expected = vec![a_id, b_id];
        expected.sort_unstable();
        assert_eq!(hub.members(RoomKind::Tenant, "t1").await.unwrap(), expected);

        hub.unregister(a_id).await.unwrap();
        assert_eq!(hub.members(RoomKind::Tenant, "t1").await.unwrap(), vec![b_id]);

        hub.unregister(b_id).await.unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.tenant_rooms, 0);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_is_idempotent() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (a, mut rx) = connection("t1", 8);
        let id = a.id();

        hub.register(a).await.unwrap();
        hub.unregister(id).await.unwrap();
        hub.unregister(id).await.unwrap();

        assert!(rx.recv().await.is_none());
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_topic_rooms_follow_membership() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (a, _rx_a) = connection("t1", 8);
        let (b, _rx_b) = connection("t1", 8);
        let (a_id, b_id) = (a.id(), b.id());
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        hub.join_topic(a_id, "K9").await.unwrap();
        hub.join_topic(b_id, "K9").await.unwrap();
        hub.join_topic(a_id, "K10").await.unwrap();
        assert_eq!(hub.stats().await.unwrap().topic_rooms, 2);

        hub.leave_topic(a_id, "K9").await.unwrap();
        assert_eq!(hub.members(RoomKind::Topic, "K9").await.unwrap(), vec![b_id]);

        // Unregister removes from every remaining topic room.
        hub.unregister(a_id).await.unwrap();
        assert!(hub.members(RoomKind::Topic, "K10").await.unwrap().is_empty());

        hub.leave_topic(b_id, "K9").await.unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.topic_rooms, 0);
        // Tenant membership untouched by topic operations.
        assert_eq!(hub.members(RoomKind::Tenant, "t1").await.unwrap(), vec![b_id]);
    }

    #[tokio::test]
    async fn test_join_from_unregistered_connection_is_ignored() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        hub.join_topic(ConnectionId::next(), "K9").await.unwrap();
        assert_eq!(hub.stats().await.unwrap().topic_rooms, 0);
    }

    #[tokio::test]
    async fn test_broadcast_attempts_one_push_per_member() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (conn, rx) = connection("t1", 8);
            hub.register(conn).await.unwrap();
            receivers.push(rx);
        }
        let (other, mut other_rx) = connection("t2", 8);
        hub.register(other).await.unwrap();

        hub.broadcast(BroadcastMessage::to_tenant("t1", &b"hello"[..]))
            .await
            .unwrap();

        assert_eq!(hub.stats().await.unwrap().delivery_attempts, 5);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().as_deref(), Some(&b"hello"[..]));
        }
        assert!(other_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room_is_noop() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        hub.broadcast(BroadcastMessage::to_topic("ghost", &b"x"[..]))
            .await
            .unwrap();
        assert_eq!(hub.stats().await.unwrap().delivery_attempts, 0);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_the_slow_member() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (slow, mut slow_rx) = connection("t1", 1);
        let (fast, mut fast_rx) = connection("t1", 8);
        let (slow_id, fast_id) = (slow.id(), fast.id());
        hub.register(slow).await.unwrap();
        hub.register(fast).await.unwrap();
        hub.join_topic(slow_id, "K9").await.unwrap();

        hub.broadcast(BroadcastMessage::to_tenant("t1", &b"1"[..]))
            .await
            .unwrap();
        hub.broadcast(BroadcastMessage::to_tenant("t1", &b"2"[..]))
            .await
            .unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.topic_rooms, 0);
        assert_eq!(hub.members(RoomKind::Tenant, "t1").await.unwrap(), vec![fast_id]);

        // The slow consumer keeps what was queued, then sees the queue closed.
        assert_eq!(slow_rx.recv().await.as_deref(), Some(&b"1"[..]));
        assert!(slow_rx.recv().await.is_none());

        assert_eq!(fast_rx.try_recv().as_deref(), Some(&b"1"[..]));
        assert_eq!(fast_rx.try_recv().as_deref(), Some(&b"2"[..]));
    }

    #[tokio::test]
    async fn test_closed_consumer_is_evicted() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (conn, rx) = connection("t1", 8);
        hub.register(conn).await.unwrap();
        drop(rx);

        hub.broadcast(BroadcastMessage::to_tenant("t1", &b"x"[..]))
            .await
            .unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_fifo_per_member() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (conn, mut rx) = connection("t1", 64);
        let id = conn.id();
        hub.register(conn).await.unwrap();
        hub.join_topic(id, "K9").await.unwrap();

        for i in 0..20u8 {
            let msg = if i % 2 == 0 {
                BroadcastMessage::to_tenant("t1", vec![i])
            } else {
                BroadcastMessage::to_topic("K9", vec![i])
            };
            hub.broadcast(msg).await.unwrap();
        }
        hub.stats().await.unwrap();

        for i in 0..20u8 {
            assert_eq!(rx.try_recv(), Some(Bytes::from(vec![i])));
        }
    }

    #[tokio::test]
    async fn test_direct_target() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let (a, mut rx_a) = connection("t1", 8);
        let (b, mut rx_b) = connection("t1", 8);
        let a_id = a.id();
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        hub.broadcast(BroadcastMessage::new(Target::Connection(a_id), &b"only-a"[..]))
            .await
            .unwrap();
        hub.stats().await.unwrap();

        assert_eq!(rx_a.try_recv().as_deref(), Some(&b"only-a"[..]));
        assert!(rx_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (hub, task) = Hub::spawn(&HubConfig::default());
        let (a, mut rx_a) = connection("t1", 8);
        let (b, mut rx_b) = connection("t2", 8);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();
        hub.broadcast(BroadcastMessage::to_tenant("t1", &b"before"[..]))
            .await
            .unwrap();

        hub.shutdown().await.unwrap();
        task.await.unwrap();

        // In-flight broadcast delivered before the queues closed.
        assert_eq!(rx_a.recv().await.as_deref(), Some(&b"before"[..]));
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());

        assert!(hub.is_closed());
        let (late, mut late_rx) = connection("t1", 8);
        assert_eq!(hub.register(late).await, Err(HubError::Closed));
        assert!(late_rx.recv().await.is_none());
        assert_eq!(hub.stats().await, Err(HubError::Closed));
    }

    #[tokio::test]
    async fn test_stops_when_all_handles_dropped() {
        let (hub, task) = Hub::spawn(&HubConfig::default());
        drop(hub);
        task.await.unwrap();
    }

    const TENANTS: [&str; 3] = ["t0", "t1", "t2"];
    const TOPICS: [&str; 4] = ["K0", "K1", "K2", "K3"];

    #[derive(Debug, Clone)]
    enum Op {
        Register { tenant: usize, capacity: usize },
        Unregister(usize),
        Join(usize, usize),
        Leave(usize, usize),
        Broadcast { topic: bool, key: usize },
        Drain(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            2 => (0..TENANTS.len(), 1..4usize)
                .prop_map(|(tenant, capacity)| Op::Register { tenant, capacity }),
            1 => any::<usize>().prop_map(Op::Unregister),
            3 => (any::<usize>(), 0..TOPICS.len()).prop_map(|(c, t)| Op::Join(c, t)),
            2 => (any::<usize>(), 0..TOPICS.len()).prop_map(|(c, t)| Op::Leave(c, t)),
            3 => (any::<bool>(), 0..4usize).prop_map(|(topic, key)| Op::Broadcast { topic, key }),
            1 => any::<usize>().prop_map(Op::Drain),
        ]
    }

    /// Membership as plain collections: a room is whoever is registered with
    /// that tenant or has joined that topic and not left.
    #[derive(Default)]
    struct Model {
        tenant: HashMap<ConnectionId, String>,
        topics: HashMap<ConnectionId, HashSet<String>>,
        pending: HashMap<ConnectionId, usize>,
        capacity: HashMap<ConnectionId, usize>,
        delivery_attempts: u64,
        evictions: u64,
    }

    impl Model {
        fn register(&mut self, id: ConnectionId, tenant: &str, capacity: usize) {
            self.tenant.insert(id, tenant.to_string());
            self.topics.insert(id, HashSet::new());
            self.pending.insert(id, 0);
            self.capacity.insert(id, capacity);
        }

        fn remove(&mut self, id: ConnectionId) -> bool {
            self.topics.remove(&id);
            self.pending.remove(&id);
            self.tenant.remove(&id).is_some()
        }

        fn members(&self, kind: RoomKind, key: &str) -> Vec<ConnectionId> {
            let mut ids: Vec<_> = self
                .tenant
                .iter()
                .filter(|(id, tenant)| match kind {
                    RoomKind::Tenant => tenant.as_str() == key,
                    RoomKind::Topic => self.topics[*id].contains(key),
                })
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            ids
        }

        fn broadcast(&mut self, kind: RoomKind, key: &str) {
            let recipients = self.members(kind, key);
            self.delivery_attempts += recipients.len() as u64;
            for id in recipients {
                let pending = self.pending[&id];
                if pending < self.capacity[&id] {
                    self.pending.insert(id, pending + 1);
                } else if self.remove(id) {
                    self.evictions += 1;
                }
            }
        }

        fn stats(&self) -> HubStats {
            let tenants: HashSet<_> = self.tenant.values().collect();
            let topics: HashSet<_> = self.topics.values().flatten().collect();
            HubStats {
                connections: self.tenant.len(),
                tenant_rooms: tenants.len(),
                topic_rooms: topics.len(),
                delivery_attempts: self.delivery_attempts,
                evictions: self.evictions,
            }
        }
    }

    fn pick(conns: &[(ConnectionId, QueueReceiver)], index: usize) -> Option<ConnectionId> {
        (!conns.is_empty()).then(|| conns[index % conns.len()].0)
    }

    proptest! {
        #[test]
        fn test_rooms_track_any_op_sequence(ops in prop::collection::vec(op(), 1..80)) {
            let (mut hub, _handle) = Hub::new(&HubConfig::default());
            let mut model = Model::default();
            // Every connection ever created, so ops also hit unregistered ids.
            let mut conns: Vec<(ConnectionId, QueueReceiver)> = Vec::new();

            for op in ops {
                match op {
                    Op::Register { tenant, capacity } => {
                        let (conn, rx) = connection(TENANTS[tenant], capacity);
                        let id = conn.id();
                        prop_assert!(hub.handle(Command::Register(conn)));
                        model.register(id, TENANTS[tenant], capacity);
                        conns.push((id, rx));
                    }
                    Op::Unregister(index) => {
                        let Some(id) = pick(&conns, index) else { continue };
                        hub.handle(Command::Unregister(id));
                        model.remove(id);
                    }
                    Op::Join(index, topic) => {
                        let Some(id) = pick(&conns, index) else { continue };
                        hub.handle(Command::JoinTopic {
                            connection: id,
                            topic: TOPICS[topic].to_string(),
                        });
                        if let Some(topics) = model.topics.get_mut(&id) {
                            topics.insert(TOPICS[topic].to_string());
                        }
                    }
                    Op::Leave(index, topic) => {
                        let Some(id) = pick(&conns, index) else { continue };
                        hub.handle(Command::LeaveTopic {
                            connection: id,
                            topic: TOPICS[topic].to_string(),
                        });
                        if let Some(topics) = model.topics.get_mut(&id) {
                            topics.remove(TOPICS[topic]);
                        }
                    }
                    Op::Broadcast { topic, key } => {
                        let (kind, key, message) = if topic {
                            let key = TOPICS[key % TOPICS.len()];
                            (RoomKind::Topic, key, BroadcastMessage::to_topic(key, &b"x"[..]))
                        } else {
                            let key = TENANTS[key % TENANTS.len()];
                            (RoomKind::Tenant, key, BroadcastMessage::to_tenant(key, &b"x"[..]))
                        };
                        hub.handle(Command::Broadcast(message));
                        model.broadcast(kind, key);
                    }
                    Op::Drain(index) => {
                        if conns.is_empty() {
                            continue;
                        }
                        let len = conns.len();
                        let (id, rx) = &mut conns[index % len];
                        while rx.try_recv().is_some() {}
                        if let Some(pending) = model.pending.get_mut(&*id) {
                            *pending = 0;
                        }
                    }
                }

                prop_assert_eq!(hub.stats(), model.stats());
                for tenant in TENANTS {
                    prop_assert_eq!(
                        hub.members(RoomKind::Tenant, tenant),
                        model.members(RoomKind::Tenant, tenant)
                    );
                }
                for topic in TOPICS {
                    prop_assert_eq!(
                        hub.members(RoomKind::Topic, topic),
                        model.members(RoomKind::Topic, topic)
                    );
                }
            }
        }
    }
}
