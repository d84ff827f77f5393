//! REST response envelopes and history pages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{events::EntityId, timestamp::Timestamp};

/// Standard `{ success, data, message }` response wrapper of the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiEnvelope<T> {
    /// Whether the request was accepted.
    pub success: bool,
    /// Payload of a successful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Server explanation, usually set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why an envelope could not be unwrapped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `success` was false.
    #[error("request rejected: {message}")]
    Rejected {
        /// Server explanation, or a generic one.
        message: String,
    },

    /// `success` was true but `data` was absent.
    #[error("response envelope carried no data")]
    MissingData,
}

impl<T> ApiEnvelope<T> {
    /// Successful envelope carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Failed envelope with an explanation.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Unwraps the payload of a successful envelope.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::Rejected`] when `success` is false and
    /// [`EnvelopeError::MissingData`] when a successful envelope has no data.
    pub fn into_result(self) -> Result<T, EnvelopeError> {
        if !self.success {
            return Err(EnvelopeError::Rejected {
                message: self
                    .message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            });
        }
        self.data.ok_or(EnvelopeError::MissingData)
    }
}

/// One item of a history page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    /// Server identifier of the item.
    pub id: EntityId,
    /// Position in the topic's event order.
    pub server_sequence: u64,
    /// Author, when the item has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<EntityId>,
    /// Text content.
    #[serde(default)]
    pub body: String,
    /// Tombstoned on the server.
    #[serde(default)]
    pub deleted: bool,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// Backward-paginated slice of a feed, newest first or oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Entries of this page.
    pub items: Vec<FeedEntry>,
    /// Cursor for the next older page; `None` at the beginning of history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
