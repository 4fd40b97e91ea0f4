//! External event bridge.
//!
//! Consumes domain events from the external bus and turns them into hub
//! broadcasts. The bridge only ever calls [`HubHandle::broadcast`]; it never
//! touches membership.
//!
//! A bus subscription can drop at any time. [`Bridge::run_resubscribing`]
//! reopens it with capped exponential backoff until cancelled.

use futures_util::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fanout_protocol::domain::snapshot_id;
use fanout_protocol::{DomainEvent, FrameCodec, ProtocolError, ServerEvent, TicketMerge};

use crate::hub::{HubError, HubHandle};
use crate::message::{BroadcastMessage, Target};

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bus payload could not be decoded or re-encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The hub is gone.
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Why a consumed event stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The cancellation token fired.
    Cancelled,
    /// The bus stream finished, usually because its connection dropped.
    StreamEnded,
    /// The hub shut down.
    HubClosed,
}

/// Delay bounds between resubscription attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resubscribe {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Resubscribe {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Resubscribe {
    /// Delay before attempt number `attempt` (zero-based), doubling from
    /// `min_delay` and capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let pow = attempt.min(16);
        let ms = self.min_delay.as_millis().saturating_mul(1u128 << pow);
        let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
        d.min(self.max_delay).max(self.min_delay)
    }
}

/// Map one domain event to the broadcasts it produces.
///
/// # Errors
///
/// Returns an error if the outbound event cannot be encoded.
pub fn translate(event: DomainEvent) -> Result<Vec<BroadcastMessage>, ProtocolError> {
    let messages = match event {
        DomainEvent::TicketCreated { tenant_id, ticket } => {
            vec![BroadcastMessage::encode(
                Target::Tenant(tenant_id),
                &ServerEvent::TicketCreated(ticket),
            )?]
        }
        DomainEvent::TicketUpdated { tenant_id, ticket } => {
            let topic = snapshot_id(&ticket).map(str::to_string);
            let tenant_msg = BroadcastMessage::encode(
                Target::Tenant(tenant_id),
                &ServerEvent::TicketUpdated(ticket),
            )?;
            match topic {
                Some(topic) => {
                    let topic_msg = tenant_msg.retarget(Target::Topic(topic));
                    vec![tenant_msg, topic_msg]
                }
                None => vec![tenant_msg],
            }
        }
        DomainEvent::TicketMerged {
            tenant_id,
            source_id,
            target_id,
        } => vec![BroadcastMessage::encode(
            Target::Tenant(tenant_id),
            &ServerEvent::TicketMerged(TicketMerge {
                source_id,
                target_id,
            }),
        )?],
        DomainEvent::MessageCreated {
            ticket_id, message, ..
        } => {
            if ticket_id.is_empty() {
                debug!("message.created without ticket_id");
                Vec::new()
            } else {
                vec![BroadcastMessage::encode(
                    Target::Topic(ticket_id),
                    &ServerEvent::MessageCreated(message),
                )?]
            }
        }
        DomainEvent::Ignored { event } => {
            trace!(event = %event, "Ignoring bus event");
            Vec::new()
        }
    };
    Ok(messages)
}

/// Feeds bus payloads into the hub.
#[derive(Debug, Clone)]
pub struct Bridge {
    hub: HubHandle,
    codec: FrameCodec,
}

impl Bridge {
    #[must_use]
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            codec: FrameCodec::new(),
        }
    }

    /// Decode, translate and broadcast one bus payload.
    ///
    /// Returns the number of broadcasts submitted.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] for undecodable payloads and
    /// [`BridgeError::Hub`] if the hub has shut down.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<usize, BridgeError> {
        let event = self.codec.decode_domain_event(payload)?;
        debug!(event = %event.name(), "Received bus event");

        let messages = translate(event)?;
        let count = messages.len();
        for message in messages {
            self.hub.broadcast(message).await?;
        }
        Ok(count)
    }

    /// Consume `events` until the stream ends, the hub closes, or `cancel` fires.
    ///
    /// Bad payloads are logged and skipped.
    pub async fn run<S, P>(self, events: S, cancel: CancellationToken) -> BridgeExit
    where
        S: Stream<Item = P> + Unpin,
        P: AsRef<[u8]>,
    {
        info!("Event bridge started");
        let exit = self.consume(events, &cancel).await;
        info!(?exit, "Event bridge stopped");
        exit
    }

    /// Keep a bus subscription alive until `cancel` fires or the hub closes.
    ///
    /// `subscribe` is called for the first subscription and again each time
    /// the previous one fails or its stream ends. Consecutive failures back
    /// off according to `retry`; a successful subscription resets the delay.
    pub async fn run_resubscribing<F, Fut, S, P, E>(
        self,
        mut subscribe: F,
        retry: Resubscribe,
        cancel: CancellationToken,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, E>>,
        S: Stream<Item = P> + Unpin,
        P: AsRef<[u8]>,
        E: fmt::Display,
    {
        info!("Event bridge started");
        let mut attempt: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                subscribed = subscribe() => subscribed,
            };

            match subscribed {
                Ok(events) => {
                    attempt = 0;
                    if self.consume(events, &cancel).await != BridgeExit::StreamEnded {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, attempt, "Event subscription failed"),
            }

            let delay = retry.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, "Resubscribing to event bus");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Event bridge stopped");
    }

    async fn consume<S, P>(&self, mut events: S, cancel: &CancellationToken) -> BridgeExit
    where
        S: Stream<Item = P> + Unpin,
        P: AsRef<[u8]>,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return BridgeExit::Cancelled,
                next = events.next() => {
                    let Some(payload) = next else {
                        warn!("Event stream ended");
                        return BridgeExit::StreamEnded;
                    };
                    match self.handle_payload(payload.as_ref()).await {
                        Ok(_) => {}
                        Err(BridgeError::Protocol(e)) => {
                            warn!(error = %e, "Dropping undecodable bus event");
                        }
                        Err(BridgeError::Hub(e)) => {
                            warn!(error = %e, "Hub unavailable, stopping event bridge");
                            return BridgeExit::HubClosed;
                        }
                    }
                }
            }
        }
    }
}
