//! Domain events pushed over the socket and the identifiers they carry.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::{timestamp::Timestamp, topic::Topic};

/// Server-side identifier of a message, answer, question or notification.
///
/// The API emits both numeric and string identifiers; both deserialize into
/// the same textual form so ids compare equal regardless of encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps a server identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(value) => Self(value),
            Raw::Signed(value) => Self(value.to_string()),
            Raw::Unsigned(value) => Self(value.to_string()),
        })
    }
}

/// Client-generated token linking an optimistic mutation to its server echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Body of message and answer events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Message or answer id.
    pub id: EntityId,
    /// Author of the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<EntityId>,
    /// Current text.
    #[serde(default)]
    pub body: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// Body of `message.deleted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    /// Deleted message id.
    pub id: EntityId,
}

/// Aggregate update for a vote score or reaction count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CounterPayload {
    /// Question, answer or message the counter belongs to.
    pub entity_id: EntityId,
    /// Authoritative count after the change.
    pub count: i64,
    /// Monotonic counter version, when the server tracks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Reaction name; `None` for vote scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
}

/// Body of `notification.created`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Notification id.
    pub id: EntityId,
    /// Server-defined notification category.
    #[serde(default)]
    pub kind: String,
    /// Short text for display.
    #[serde(default)]
    pub summary: String,
    /// Unread badge after this notification, if sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// Authoritative state change, tagged by its dotted `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A chat message was posted.
    #[serde(rename = "message.created")]
    MessageCreated {
        /// Event body.
        payload: MessagePayload,
    },
    /// A message body changed.
    #[serde(rename = "message.edited")]
    MessageEdited {
        /// Event body.
        payload: MessagePayload,
    },
    /// A message was removed.
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        /// Event body.
        payload: MessageDeletedPayload,
    },
    /// A reaction count changed.
    #[serde(rename = "reaction.changed")]
    ReactionChanged {
        /// Event body.
        payload: CounterPayload,
    },
    /// A vote score changed.
    #[serde(rename = "vote.changed")]
    VoteChanged {
        /// Event body.
        payload: CounterPayload,
    },
    /// An answer was posted to a question.
    #[serde(rename = "answer.created")]
    AnswerCreated {
        /// Event body.
        payload: MessagePayload,
    },
    /// A notification arrived for the user.
    #[serde(rename = "notification.created")]
    NotificationCreated {
        /// Event body.
        payload: NotificationPayload,
    },
}

/// Payload-free discriminant of [`DomainEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `message.created`
    MessageCreated,
    /// `message.edited`
    MessageEdited,
    /// `message.deleted`
    MessageDeleted,
    /// `reaction.changed`
    ReactionChanged,
    /// `vote.changed`
    VoteChanged,
    /// `answer.created`
    AnswerCreated,
    /// `notification.created`
    NotificationCreated,
}

impl EventKind {
    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessageEdited => "message.edited",
            Self::MessageDeleted => "message.deleted",
            Self::ReactionChanged => "reaction.changed",
            Self::VoteChanged => "vote.changed",
            Self::AnswerCreated => "answer.created",
            Self::NotificationCreated => "notification.created",
        }
    }
}

impl DomainEvent {
    /// Discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MessageCreated { .. } => EventKind::MessageCreated,
            Self::MessageEdited { .. } => EventKind::MessageEdited,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::ReactionChanged { .. } => EventKind::ReactionChanged,
            Self::VoteChanged { .. } => EventKind::VoteChanged,
            Self::AnswerCreated { .. } => EventKind::AnswerCreated,
            Self::NotificationCreated { .. } => EventKind::NotificationCreated,
        }
    }

    /// The entity this event mutates.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::MessageCreated { payload }
            | Self::MessageEdited { payload }
            | Self::AnswerCreated { payload } => &payload.id,
            Self::MessageDeleted { payload } => &payload.id,
            Self::ReactionChanged { payload } | Self::VoteChanged { payload } => {
                &payload.entity_id
            }
            Self::NotificationCreated { payload } => &payload.id,
        }
    }
}

/// JSON body of a STOMP `MESSAGE` frame. Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Topic the event belongs to.
    pub topic: Topic,
    /// Per-topic monotonic sequence number.
    pub server_sequence: u64,
    /// Echo of the client correlation id for the client's own mutations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// The change itself.
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventEnvelope {
    /// Envelope without a correlation id.
    #[must_use]
    pub fn new(topic: Topic, server_sequence: u64, event: DomainEvent) -> Self {
        Self {
            topic,
            server_sequence,
            correlation_id: None,
            event,
        }
    }

    /// Marks the envelope as the echo of `correlation_id`.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_wire_shape() {
        let json = r#"{
            "topic": "question:7",
            "serverSequence": 12,
            "correlationId": "6f1c1c43-5a38-4f0e-9d5c-6d8a3f0c2b11",
            "type": "vote.changed",
            "payload": { "entityId": "q1", "count": 6, "version": 3 }
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.topic, Topic::question(7));
        assert_eq!(envelope.server_sequence, 12);
        assert!(envelope.correlation_id.is_some());
        assert_eq!(envelope.event.kind(), EventKind::VoteChanged);
        match envelope.event {
            DomainEvent::VoteChanged { payload } => {
                assert_eq!(payload.entity_id, EntityId::from("q1"));
                assert_eq!(payload.count, 6);
                assert_eq!(payload.version, Some(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn numeric_ids_match_textual_ids() {
        let json = r#"{
            "topic": "conversation:42",
            "serverSequence": 1,
            "type": "message.deleted",
            "payload": { "id": 901 }
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.event.entity_id(), &EntityId::from("901"));
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn serialized_envelope_carries_type_tag() {
        let envelope = EventEnvelope::new(
            Topic::conversation(1),
            4,
            DomainEvent::MessageCreated {
                payload: MessagePayload {
                    id: "m4".into(),
                    author_id: None,
                    body: "hi".into(),
                    created_at: None,
                },
            },
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""type":"message.created""#));
        assert!(json.contains(r#""serverSequence":4"#));
        assert!(!json.contains("correlationId"));
    }
}
