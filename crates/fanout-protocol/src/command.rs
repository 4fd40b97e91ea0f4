//! Commands sent by connected clients.
//!
//! A client frame is `{"event": <name>, "data": <payload>}`. Recognised names
//! decode into a [`ClientCommand`]; anything else becomes
//! [`ClientCommand::Ignored`] so that newer clients never break older hubs.

use serde::Deserialize;
use serde_json::Value;

use crate::codec::ProtocolError;

/// Inbound event names.
pub mod names {
    pub const TOPIC_JOIN: &str = "topic:join";
    pub const TOPIC_LEAVE: &str = "topic:leave";
    pub const TYPING: &str = "typing";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PRESENCE_LIST: &str = "presence:list";

    /// Older clients address topics as tickets.
    pub const TICKET_JOIN: &str = "ticket:join";
    pub const TICKET_LEAVE: &str = "ticket:leave";
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicData {
    #[serde(default, alias = "ticketId")]
    topic_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingData {
    #[serde(default, alias = "ticketId")]
    topic_id: String,
    #[serde(default)]
    is_typing: bool,
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start watching a topic.
    JoinTopic { topic_id: String },
    /// Stop watching a topic.
    LeaveTopic { topic_id: String },
    /// Typing indicator for a topic.
    Typing { topic_id: String, is_typing: bool },
    /// Keep the presence record alive.
    Heartbeat,
    /// Ask for the tenant's online agents.
    PresenceList,
    /// Any event name this hub does not know.
    Ignored { event: String },
}

impl ClientCommand {
    /// Decode a command from a raw JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not an envelope, or if a recognised
    /// command has a missing or empty topic id.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        Self::from_envelope(envelope.event, envelope.data)
    }

    fn from_envelope(event: String, data: Value) -> Result<Self, ProtocolError> {
        let command = match event.as_str() {
            names::TOPIC_JOIN | names::TICKET_JOIN => ClientCommand::JoinTopic {
                topic_id: topic_id(data)?,
            },
            names::TOPIC_LEAVE | names::TICKET_LEAVE => ClientCommand::LeaveTopic {
                topic_id: topic_id(data)?,
            },
            names::TYPING => {
                let typing: TypingData = serde_json::from_value(data)?;
                if typing.topic_id.is_empty() {
                    return Err(ProtocolError::MissingField("topicId"));
                }
                ClientCommand::Typing {
                    topic_id: typing.topic_id,
                    is_typing: typing.is_typing,
                }
            }
            names::HEARTBEAT => ClientCommand::Heartbeat,
            names::PRESENCE_LIST => ClientCommand::PresenceList,
            _ => ClientCommand::Ignored { event },
        };
        Ok(command)
    }

    /// The event name this command was decoded from.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ClientCommand::JoinTopic { .. } => names::TOPIC_JOIN,
            ClientCommand::LeaveTopic { .. } => names::TOPIC_LEAVE,
            ClientCommand::Typing { .. } => names::TYPING,
            ClientCommand::Heartbeat => names::HEARTBEAT,
            ClientCommand::PresenceList => names::PRESENCE_LIST,
            ClientCommand::Ignored { event } => event,
        }
    }
}

fn topic_id(data: Value) -> Result<String, ProtocolError> {
    let parsed: TopicData = serde_json::from_value(data)?;
    if parsed.topic_id.is_empty() {
        return Err(ProtocolError::MissingField("topicId"));
    }
    Ok(parsed.topic_id)
}
