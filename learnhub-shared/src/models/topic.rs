//! Realtime topic names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical realtime channel, e.g. `conversation:42` or `notifications:user9`.
///
/// Topics are opaque to the transport; the prefix before the first `:` is
/// only used to pick REST endpoints for mutations and history paging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

/// Family of a topic, taken from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// `conversation:<id>`, a chat room.
    Conversation,
    /// `question:<id>`, a Q&A thread.
    Question,
    /// `notifications:<user>`, a user's notification feed.
    Notifications,
    /// Any other prefix.
    Other,
}

impl TopicKind {
    /// Prefix text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Question => "question",
            Self::Notifications => "notifications",
            Self::Other => "other",
        }
    }
}

impl TryFrom<&str> for TopicKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "conversation" => Ok(Self::Conversation),
            "question" => Ok(Self::Question),
            "notifications" => Ok(Self::Notifications),
            _ => Err("invalid topic kind"),
        }
    }
}

impl Topic {
    /// Topic from its full name.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `conversation:<id>`
    pub fn conversation(id: impl fmt::Display) -> Self {
        Self(format!("conversation:{id}"))
    }

    /// `question:<id>`
    pub fn question(id: impl fmt::Display) -> Self {
        Self(format!("question:{id}"))
    }

    /// `notifications:<user_id>`
    pub fn notifications(user_id: impl fmt::Display) -> Self {
        Self(format!("notifications:{user_id}"))
    }

    /// Full topic name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Family of the topic; [`TopicKind::Other`] for unknown prefixes.
    #[must_use]
    pub fn kind(&self) -> TopicKind {
        self.0
            .split_once(':')
            .and_then(|(kind, _)| TopicKind::try_from(kind).ok())
            .unwrap_or(TopicKind::Other)
    }

    /// Identifier after the kind prefix (`42` for `conversation:42`).
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.0
            .split_once(':')
            .map(|(_, id)| id)
            .filter(|id| !id.is_empty())
    }

    /// STOMP destination for this topic under the given prefix.
    #[must_use]
    pub fn destination(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }

    /// Inverse of [`Topic::destination`].
    #[must_use]
    pub fn from_destination(destination: &str, prefix: &str) -> Option<Self> {
        destination
            .strip_prefix(prefix)
            .filter(|rest| !rest.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_resource_id_follow_prefix() {
        let topic = Topic::conversation(42);
        assert_eq!(topic.as_str(), "conversation:42");
        assert_eq!(topic.kind(), TopicKind::Conversation);
        assert_eq!(topic.resource_id(), Some("42"));

        assert_eq!(Topic::notifications("user9").kind(), TopicKind::Notifications);
        assert_eq!(Topic::new("presence").kind(), TopicKind::Other);
        assert_eq!(Topic::new("presence").resource_id(), None);
    }

    #[test]
    fn destination_round_trips_through_prefix() {
        let topic = Topic::question(7);
        let destination = topic.destination("/topic/");
        assert_eq!(destination, "/topic/question:7");
        assert_eq!(Topic::from_destination(&destination, "/topic/"), Some(topic));
        assert_eq!(Topic::from_destination("/queue/question:7", "/topic/"), None);
        assert_eq!(Topic::from_destination("/topic/", "/topic/"), None);
    }
}
