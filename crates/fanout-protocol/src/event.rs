//! Events pushed from the hub to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outbound event.
///
/// Serializes as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// An agent connected to the tenant.
    #[serde(rename = "agent:online")]
    AgentOnline(AgentPresence),

    /// An agent disconnected from the tenant.
    #[serde(rename = "agent:offline")]
    AgentOffline(AgentPresence),

    /// Someone started or stopped typing in a topic.
    #[serde(rename = "typing")]
    Typing(TypingIndicator),

    /// Current viewers of a topic.
    #[serde(rename = "topic:viewers")]
    Viewers(ViewerList),

    /// Reply to a `presence:list` request.
    #[serde(rename = "presence:list")]
    PresenceList(PresenceList),

    /// Ticket snapshot, passed through untouched.
    #[serde(rename = "ticket:created")]
    TicketCreated(Value),

    /// Ticket snapshot, passed through untouched.
    #[serde(rename = "ticket:updated")]
    TicketUpdated(Value),

    #[serde(rename = "ticket:merged")]
    TicketMerged(TicketMerge),

    /// Message snapshot, passed through untouched.
    #[serde(rename = "message:created")]
    MessageCreated(Value),
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AgentOnline(_) => "agent:online",
            ServerEvent::AgentOffline(_) => "agent:offline",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::Viewers(_) => "topic:viewers",
            ServerEvent::PresenceList(_) => "presence:list",
            ServerEvent::TicketCreated(_) => "ticket:created",
            ServerEvent::TicketUpdated(_) => "ticket:updated",
            ServerEvent::TicketMerged(_) => "ticket:merged",
            ServerEvent::MessageCreated(_) => "message:created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPresence {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: String,
    /// Display label, the local part of the agent's email.
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerList {
    pub topic_id: String,
    pub viewers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceList {
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMerge {
    pub source_id: String,
    pub target_id: String,
}
