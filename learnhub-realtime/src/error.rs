//! # Sync Error Types
//!
//! Transport-level errors are recovered by the reconnect loop; mutation-level
//! errors are surfaced to the caller that issued the mutation. Malformed
//! frames are logged and dropped and never reach the UI.

use std::time::Duration;

use shared::models::{CorrelationId, EntityId, MutationKind, Topic};
use thiserror::Error;

/// Result type alias for realtime operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Everything that can go wrong in the realtime layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Credential missing or rejected. Fatal to the session.
    #[error("authentication failed: {reason}")]
    Auth {
        /// What the server or provider said.
        reason: String,
    },

    /// Socket could not be established or dropped.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying failure.
        reason: String,
    },

    /// Another mutation of the same kind is already pending for the entity.
    #[error("a {kind} mutation is already pending for {entity_id}")]
    Conflict {
        /// Entity with the outstanding mutation.
        entity_id: EntityId,
        /// Kind of the outstanding mutation.
        kind: MutationKind,
    },

    /// Neither a matching event nor a REST failure arrived in time.
    #[error("mutation {correlation_id} was not confirmed within {timeout:?}")]
    ReconciliationTimeout {
        /// Mutation that expired.
        correlation_id: CorrelationId,
        /// Configured reconciliation window.
        timeout: Duration,
    },

    /// Inbound frame could not be decoded. Never leaves the dispatcher.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Decoder complaint.
        reason: String,
    },

    /// The REST collaborator refused the mutation or the request failed.
    #[error("request rejected: {message}")]
    Rejected {
        /// HTTP status, when there was a response.
        status: Option<u16>,
        /// Server or client explanation.
        message: String,
    },

    /// A topic operation named a topic nobody follows.
    #[error("topic {topic} has no subscribers")]
    NotSubscribed {
        /// The unknown topic.
        topic: Topic,
    },

    /// The session ended before the operation could finish.
    #[error("session closed")]
    SessionClosed,
}

impl SyncError {
    /// [`SyncError::Auth`] with `reason`.
    pub fn auth<T: Into<String>>(reason: T) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// [`SyncError::Transport`] with `reason`.
    pub fn transport<T: Into<String>>(reason: T) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// [`SyncError::MalformedFrame`] with `reason`.
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// [`SyncError::Rejected`] with an optional status.
    pub fn rejected<T: Into<String>>(status: Option<u16>, message: T) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether the error ends the session instead of triggering a retry.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::SessionClosed)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        Self::malformed(error.to_string())
    }
}
