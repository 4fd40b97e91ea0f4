//! Domain events published by the backend on the external event bus.
//!
//! Bus messages look like
//! `{"event": "ticket.updated", "tenant_id": "..", "ticket": {..}}` with the
//! optional fragments `ticket`, `ticket_id`, `message`, `source_id` and
//! `target_id` depending on the event.

use serde::Deserialize;
use serde_json::Value;

use crate::codec::ProtocolError;

/// Bus event names.
pub mod names {
    pub const TICKET_CREATED: &str = "ticket.created";
    pub const TICKET_UPDATED: &str = "ticket.updated";
    pub const TICKET_MERGED: &str = "ticket.merged";
    pub const MESSAGE_CREATED: &str = "message.created";
}

#[derive(Debug, Deserialize)]
struct DomainEnvelope {
    event: String,
    #[serde(default)]
    tenant_id: String,
    #[serde(default)]
    ticket: Option<Value>,
    #[serde(default)]
    ticket_id: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    target_id: Option<String>,
}

/// A decoded domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TicketCreated {
        tenant_id: String,
        ticket: Value,
    },
    TicketUpdated {
        tenant_id: String,
        ticket: Value,
    },
    TicketMerged {
        tenant_id: String,
        source_id: String,
        target_id: String,
    },
    MessageCreated {
        tenant_id: String,
        ticket_id: String,
        message: Value,
    },
    /// An event this hub does not translate.
    Ignored { event: String },
}

impl DomainEvent {
    /// Decode a bus payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object with an `event` field.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: DomainEnvelope = serde_json::from_slice(data)?;
        Ok(Self::from_envelope(envelope))
    }

    fn from_envelope(envelope: DomainEnvelope) -> Self {
        let DomainEnvelope {
            event,
            tenant_id,
            ticket,
            ticket_id,
            message,
            source_id,
            target_id,
        } = envelope;

        match event.as_str() {
            names::TICKET_CREATED => DomainEvent::TicketCreated {
                tenant_id,
                ticket: ticket.unwrap_or(Value::Null),
            },
            names::TICKET_UPDATED => DomainEvent::TicketUpdated {
                tenant_id,
                ticket: ticket.unwrap_or(Value::Null),
            },
            names::TICKET_MERGED => DomainEvent::TicketMerged {
                tenant_id,
                source_id: source_id.unwrap_or_default(),
                target_id: target_id.unwrap_or_default(),
            },
            names::MESSAGE_CREATED => DomainEvent::MessageCreated {
                tenant_id,
                ticket_id: ticket_id.unwrap_or_default(),
                message: message.unwrap_or(Value::Null),
            },
            _ => DomainEvent::Ignored { event },
        }
    }

    /// The bus event name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            DomainEvent::TicketCreated { .. } => names::TICKET_CREATED,
            DomainEvent::TicketUpdated { .. } => names::TICKET_UPDATED,
            DomainEvent::TicketMerged { .. } => names::TICKET_MERGED,
            DomainEvent::MessageCreated { .. } => names::MESSAGE_CREATED,
            DomainEvent::Ignored { event } => event,
        }
    }
}

/// Extract a non-empty string `id` from a snapshot object.
#[must_use]
pub fn snapshot_id(snapshot: &Value) -> Option<&str> {
    snapshot
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticket_updated() {
        let raw = json!({
            "event": "ticket.updated",
            "tenant_id": "T1",
            "ticket": {"id": "K9", "status": "open"}
        })
        .to_string();
        let event = DomainEvent::from_slice(raw.as_bytes()).unwrap();

        match event {
            DomainEvent::TicketUpdated { tenant_id, ticket } => {
                assert_eq!(tenant_id, "T1");
                assert_eq!(snapshot_id(&ticket), Some("K9"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_message_created() {
        let raw = json!({
            "event": "message.created",
            "tenant_id": "T1",
            "ticket_id": "K9",
            "message": {"body": "hi"}
        })
        .to_string();
        assert_eq!(
            DomainEvent::from_slice(raw.as_bytes()).unwrap(),
            DomainEvent::MessageCreated {
                tenant_id: "T1".into(),
                ticket_id: "K9".into(),
                message: json!({"body": "hi"}),
            }
        );
    }

    #[test]
    fn test_merged_defaults_missing_ids() {
        let raw = br#"{"event":"ticket.merged","tenant_id":"T1","source_id":"A"}"#;
        assert_eq!(
            DomainEvent::from_slice(raw).unwrap(),
            DomainEvent::TicketMerged {
                tenant_id: "T1".into(),
                source_id: "A".into(),
                target_id: String::new(),
            }
        );
    }

    #[test]
    fn test_unknown_and_garbage() {
        let ignored = DomainEvent::from_slice(br#"{"event":"contact.created","tenant_id":"T1"}"#)
            .unwrap();
        assert_eq!(ignored.name(), "contact.created");

        assert!(DomainEvent::from_slice(b"{oops").is_err());
    }

    #[test]
    fn test_snapshot_id() {
        assert_eq!(snapshot_id(&json!({"id": "K1"})), Some("K1"));
        assert_eq!(snapshot_id(&json!({"id": ""})), None);
        assert_eq!(snapshot_id(&json!({"id": 42})), None);
        assert_eq!(snapshot_id(&Value::Null), None);
    }
}
