//! Optimistic mutation payloads and their REST request bodies.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::events::{CorrelationId, EntityId};

/// Kind of optimistic mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Post a chat message.
    SendMessage,
    /// Post an answer to a question.
    PostAnswer,
    /// Vote on a question or answer.
    CastVote,
    /// Add or remove a reaction.
    React,
}

impl MutationKind {
    /// Stable snake_case name, used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::PostAnswer => "post_answer",
            Self::CastVote => "cast_vote",
            Self::React => "react",
        }
    }

    /// Whether the mutation adds a feed item (as opposed to moving a counter).
    #[must_use]
    pub const fn creates_item(self) -> bool {
        matches!(self, Self::SendMessage | Self::PostAnswer)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The local side of an optimistic action, applied before the server agrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPayload {
    /// Chat message text.
    Message {
        /// Message text.
        body: String,
    },
    /// Answer text.
    Answer {
        /// Answer text.
        body: String,
    },
    /// Vote on an entity.
    Vote {
        /// Voted entity.
        entity_id: EntityId,
        /// `1` for an upvote, `-1` for a downvote.
        delta: i64,
    },
    /// Reaction toggle on an entity.
    Reaction {
        /// Entity reacted to.
        entity_id: EntityId,
        /// Reaction name.
        reaction: String,
        /// `1` to add, `-1` to remove.
        delta: i64,
    },
}

impl LocalPayload {
    /// Mutation kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Message { .. } => MutationKind::SendMessage,
            Self::Answer { .. } => MutationKind::PostAnswer,
            Self::Vote { .. } => MutationKind::CastVote,
            Self::Reaction { .. } => MutationKind::React,
        }
    }

    /// Counter target and delta for vote and reaction payloads.
    #[must_use]
    pub fn counter_delta(&self) -> Option<(&EntityId, i64)> {
        match self {
            Self::Vote { entity_id, delta } | Self::Reaction { entity_id, delta, .. } => {
                Some((entity_id, *delta))
            }
            Self::Message { .. } | Self::Answer { .. } => None,
        }
    }

    /// Text for payloads that create a feed item.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Message { body } | Self::Answer { body } => Some(body),
            Self::Vote { .. } | Self::Reaction { .. } => None,
        }
    }
}

/// `POST` body for a new chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Client token echoed back on the resulting event.
    pub correlation_id: CorrelationId,
    /// Message text.
    pub body: String,
}

/// `POST` body for a new answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnswerRequest {
    /// Client token echoed back on the resulting event.
    pub correlation_id: CorrelationId,
    /// Answer text.
    pub body: String,
}

/// `POST` body for a vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    /// Client token echoed back on the resulting event.
    pub correlation_id: CorrelationId,
    /// Voted entity.
    pub entity_id: EntityId,
    /// Vote direction.
    pub delta: i64,
}

/// `POST` body for a reaction toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactRequest {
    /// Client token echoed back on the resulting event.
    pub correlation_id: CorrelationId,
    /// Entity reacted to.
    pub entity_id: EntityId,
    /// Reaction name.
    pub reaction: String,
    /// `1` to add, `-1` to remove.
    pub delta: i64,
}

/// REST body for a mutation, one variant per endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MutationRequest {
    /// Chat message.
    Message(CreateMessageRequest),
    /// Answer.
    Answer(CreateAnswerRequest),
    /// Vote.
    Vote(CastVoteRequest),
    /// Reaction.
    React(ReactRequest),
}

impl MutationRequest {
    /// Builds the REST body for `payload`.
    #[must_use]
    pub fn from_payload(correlation_id: CorrelationId, payload: &LocalPayload) -> Self {
        match payload {
            LocalPayload::Message { body } => Self::Message(CreateMessageRequest {
                correlation_id,
                body: body.clone(),
            }),
            LocalPayload::Answer { body } => Self::Answer(CreateAnswerRequest {
                correlation_id,
                body: body.clone(),
            }),
            LocalPayload::Vote { entity_id, delta } => Self::Vote(CastVoteRequest {
                correlation_id,
                entity_id: entity_id.clone(),
                delta: *delta,
            }),
            LocalPayload::Reaction {
                entity_id,
                reaction,
                delta,
            } => Self::React(ReactRequest {
                correlation_id,
                entity_id: entity_id.clone(),
                reaction: reaction.clone(),
                delta: *delta,
            }),
        }
    }

    /// Correlation id carried by the body.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Message(request) => request.correlation_id,
            Self::Answer(request) => request.correlation_id,
            Self::Vote(request) => request.correlation_id,
            Self::React(request) => request.correlation_id,
        }
    }
}

/// `data` of a successful mutation response. Every field is optional because
/// endpoints disagree on what they echo.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MutationAck {
    /// Server id of the created entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Echoed correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Sequence the resulting event will carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_sequence: Option<u64>,
}
