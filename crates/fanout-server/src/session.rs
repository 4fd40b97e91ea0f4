//! One connected client.
//!
//! A session owns two loops over a split transport. The inbound loop decodes
//! client commands and acts on them; the outbound loop drains the
//! connection's delivery queue and pings the peer. Whichever loop ends first
//! stops the other, and the session then tears down exactly once.

use crate::config::SessionConfig;
use crate::metrics::{self, ConnectionMetricsGuard};
use fanout_core::{
    delivery_queue, BroadcastMessage, ConnectionHandle, ConnectionId, ConnectionInfo, HubError,
    HubHandle, Identity, PresenceStore, QueueReceiver, QueueSender, Target, ViewerStore,
};
use fanout_protocol::{
    AgentPresence, ClientCommand, FrameCodec, PresenceList, ProtocolError, ServerEvent,
    TypingIndicator, ViewerList,
};
use fanout_transport::{FrameReader, FrameWriter, TransportError, WireMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub presence: Arc<dyn PresenceStore>,
    pub viewers: Arc<dyn ViewerStore>,
    pub settings: SessionConfig,
}

#[derive(Debug, Error)]
enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// A verified client connection.
pub struct Session {
    info: Arc<ConnectionInfo>,
    ctx: SessionContext,
    codec: FrameCodec,
    closed: AtomicBool,
}

impl Session {
    #[must_use]
    pub fn new(identity: Identity, ctx: SessionContext) -> Self {
        let codec = FrameCodec::with_max_frame_size(ctx.settings.max_message_size);
        Self {
            info: Arc::new(ConnectionInfo::new(identity)),
            ctx,
            codec,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Serve the connection until either side gives up.
    pub async fn run<R, W>(self, reader: R, mut writer: W)
    where
        R: FrameReader,
        W: FrameWriter + 'static,
    {
        let _metrics = ConnectionMetricsGuard::new();

        let (queue, frames) = delivery_queue(self.ctx.settings.queue_capacity);
        if let Err(e) = self.open(queue).await {
            warn!(connection = %self.info.id, error = %e, "Could not register connection");
            let _ = writer.close().await;
            return;
        }

        let cancel = CancellationToken::new();
        let outbound = tokio::spawn(write_loop(
            writer,
            frames,
            self.ctx.settings.ping_interval(),
            cancel.clone(),
            self.info.id,
        ));

        self.read_loop(reader, &cancel).await;
        cancel.cancel();
        self.teardown().await;

        if let Err(e) = outbound.await {
            warn!(connection = %self.info.id, error = %e, "Outbound task failed");
        }
    }

    /// Register with the hub, mark the user present and announce them.
    async fn open(&self, queue: QueueSender) -> Result<(), HubError> {
        let info = &self.info;
        self.ctx
            .hub
            .register(ConnectionHandle::new(Arc::clone(info), queue))
            .await?;

        if let Err(e) = self
            .ctx
            .presence
            .set_presence(&info.tenant_id, &info.user_id)
            .await
        {
            warn!(user = %info.user_id, error = %e, "Failed to record presence");
        }

        let online = ServerEvent::AgentOnline(AgentPresence {
            user_id: info.user_id.clone(),
        });
        self.publish(Target::Tenant(info.tenant_id.clone()), &online)
            .await?;

        info!(
            connection = %info.id,
            user = %info.user_id,
            tenant = %info.tenant_id,
            name = %info.label,
            "Client connected"
        );
        Ok(())
    }

    async fn read_loop<R: FrameReader>(&self, mut reader: R, cancel: &CancellationToken) {
        let connection = self.info.id;
        let pong_wait = self.ctx.settings.pong_wait();
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout_at(deadline, reader.recv()) => received,
            };

            let message = match received {
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => {
                    debug!(connection = %connection, "Client hung up");
                    break;
                }
                Ok(Err(TransportError::MessageTooLarge { size, max })) => {
                    info!(connection = %connection, size, max, "Frame over size limit");
                    metrics::record_error("frame_too_large");
                    break;
                }
                Ok(Err(e)) => {
                    debug!(connection = %connection, error = %e, "Read failed");
                    metrics::record_error("transport");
                    break;
                }
                Err(_) => {
                    info!(connection = %connection, "No pong before deadline");
                    break;
                }
            };

            match message {
                WireMessage::Text(data) => {
                    metrics::record_message(data.len(), "inbound");
                    if let Err(e) = self.handle_frame(&data).await {
                        match e {
                            SessionError::Protocol(e) => {
                                info!(
                                    connection = %connection,
                                    error = %e,
                                    "Closing on protocol violation"
                                );
                                metrics::record_error("frame_too_large");
                            }
                            SessionError::Hub(e) => {
                                debug!(connection = %connection, error = %e, "Hub unavailable");
                            }
                        }
                        break;
                    }
                }
                WireMessage::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                }
                WireMessage::Ping(_) => {}
                WireMessage::Close => {
                    debug!(connection = %connection, "Received close frame");
                    break;
                }
            }
        }
    }

    /// Decode and apply one client frame. Only fatal errors are returned.
    async fn handle_frame(&self, data: &[u8]) -> Result<(), SessionError> {
        let command = match self.codec.decode_command(data) {
            Ok(command) => command,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(connection = %self.info.id, error = %e, "Dropping malformed frame");
                metrics::record_error("malformed");
                return Ok(());
            }
        };

        trace!(connection = %self.info.id, event = %command.name(), "Client command");

        match command {
            ClientCommand::JoinTopic { topic_id } => self.join_topic(&topic_id).await?,
            ClientCommand::LeaveTopic { topic_id } => self.leave_topic(&topic_id).await?,
            ClientCommand::Typing {
                topic_id,
                is_typing,
            } => self.typing(topic_id, is_typing).await?,
            ClientCommand::Heartbeat => self.heartbeat().await,
            ClientCommand::PresenceList => self.reply_presence().await?,
            ClientCommand::Ignored { event } => {
                trace!(connection = %self.info.id, event = %event, "Ignoring unknown event");
            }
        }
        Ok(())
    }

    async fn join_topic(&self, topic_id: &str) -> Result<(), HubError> {
        if topic_id.is_empty() {
            return Ok(());
        }

        self.ctx.hub.join_topic(self.info.id, topic_id).await?;
        if let Err(e) = self.ctx.viewers.add_viewer(topic_id, &self.info.user_id).await {
            warn!(topic = %topic_id, error = %e, "Failed to add viewer");
        }
        debug!(connection = %self.info.id, topic = %topic_id, "Joined topic");

        self.publish_viewers(topic_id).await
    }

    async fn leave_topic(&self, topic_id: &str) -> Result<(), HubError> {
        if topic_id.is_empty() {
            return Ok(());
        }

        self.ctx.hub.leave_topic(self.info.id, topic_id).await?;
        if let Err(e) = self
            .ctx
            .viewers
            .remove_viewer(topic_id, &self.info.user_id)
            .await
        {
            warn!(topic = %topic_id, error = %e, "Failed to remove viewer");
        }
        debug!(connection = %self.info.id, topic = %topic_id, "Left topic");

        self.publish_viewers(topic_id).await
    }

    async fn publish_viewers(&self, topic_id: &str) -> Result<(), HubError> {
        let viewers = match self.ctx.viewers.viewers(topic_id).await {
            Ok(viewers) => viewers,
            Err(e) => {
                warn!(topic = %topic_id, error = %e, "Failed to read viewers");
                return Ok(());
            }
        };

        let event = ServerEvent::Viewers(ViewerList {
            topic_id: topic_id.to_string(),
            viewers,
        });
        self.publish(Target::Topic(topic_id.to_string()), &event).await
    }

    async fn typing(&self, topic_id: String, is_typing: bool) -> Result<(), HubError> {
        let event = ServerEvent::Typing(TypingIndicator {
            user_id: self.info.user_id.clone(),
            user_name: self.info.label.clone(),
            is_typing,
        });
        self.publish(Target::Topic(topic_id), &event).await
    }

    async fn heartbeat(&self) {
        if let Err(e) = self
            .ctx
            .presence
            .set_presence(&self.info.tenant_id, &self.info.user_id)
            .await
        {
            warn!(user = %self.info.user_id, error = %e, "Failed to refresh presence");
        }
    }

    async fn reply_presence(&self) -> Result<(), HubError> {
        let agent_ids = match self.ctx.presence.list_presence(&self.info.tenant_id).await {
            Ok(agent_ids) => agent_ids,
            Err(e) => {
                warn!(tenant = %self.info.tenant_id, error = %e, "Failed to list presence");
                return Ok(());
            }
        };

        let event = ServerEvent::PresenceList(PresenceList { agent_ids });
        self.publish(Target::Connection(self.info.id), &event).await
    }

    async fn publish(&self, target: Target, event: &ServerEvent) -> Result<(), HubError> {
        match BroadcastMessage::encode(target, event) {
            Ok(message) => self.ctx.hub.broadcast(message).await,
            Err(e) => {
                warn!(event = %event.name(), error = %e, "Failed to encode event");
                Ok(())
            }
        }
    }

    /// Clear presence, announce the departure and leave the hub. Runs once.
    async fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let info = &self.info;

        if let Err(e) = self
            .ctx
            .presence
            .remove_presence(&info.tenant_id, &info.user_id)
            .await
        {
            warn!(user = %info.user_id, error = %e, "Failed to clear presence");
        }

        let offline = ServerEvent::AgentOffline(AgentPresence {
            user_id: info.user_id.clone(),
        });
        if self
            .publish(Target::Tenant(info.tenant_id.clone()), &offline)
            .await
            .is_err()
            || self.ctx.hub.unregister(info.id).await.is_err()
        {
            debug!(connection = %info.id, "Hub already stopped");
        }

        info!(connection = %info.id, user = %info.user_id, "Client disconnected");
    }
}

async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut frames: QueueReceiver,
    ping_interval: Duration,
    cancel: CancellationToken,
    connection: ConnectionId,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!(connection = %connection, "Delivery queue closed");
                    break;
                };
                let len = frame.len();
                if let Err(e) = writer.send_text(frame).await {
                    debug!(connection = %connection, error = %e, "Write failed");
                    break;
                }
                metrics::record_message(len, "outbound");
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.ping().await {
                    debug!(connection = %connection, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    let _ = writer.close().await;
    cancel.cancel();
}
