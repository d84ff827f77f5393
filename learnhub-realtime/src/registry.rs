//! Reference-counted topic subscriptions.
//!
//! Wire-level `SUBSCRIBE` is emitted only on a topic's 0→1 transition and
//! `UNSUBSCRIBE` only on 1→0. While the transport is down, new topics are
//! queued and flushed by [`SubscriptionRegistry::on_connected`].

use std::collections::{BTreeMap, BTreeSet};

use shared::models::Topic;
use tracing::debug;

/// Caller-side token for one `subscribe` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    /// Unique id of this subscription.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// A frame the registry wants sent on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    /// Put `topic` on the wire under `wire_id`.
    Subscribe {
        /// STOMP subscription id.
        wire_id: String,
        /// Topic being subscribed.
        topic: Topic,
    },
    /// Take the subscription `wire_id` off the wire.
    Unsubscribe {
        /// STOMP subscription id.
        wire_id: String,
        /// Topic being released.
        topic: Topic,
    },
}

impl WireOp {
    /// Topic the operation concerns.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        match self {
            Self::Subscribe { topic, .. } | Self::Unsubscribe { topic, .. } => topic,
        }
    }
}

/// Returned when the last handle of a topic goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Topic that lost its last subscriber.
    pub topic: Topic,
    /// `None` when the topic never made it onto the wire.
    pub op: Option<WireOp>,
}

#[derive(Debug, Default)]
struct TopicEntry {
    handles: BTreeSet<u64>,
    wire_id: Option<String>,
}

/// Subscription handles per topic and their wire state.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: BTreeMap<Topic, TopicEntry>,
    next_handle: u64,
    next_wire_id: u64,
    connected: bool,
}

impl SubscriptionRegistry {
    /// Empty registry for a disconnected transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle for `topic`. Returns the `SUBSCRIBE` to send when this is
    /// the topic's first handle and the transport is up.
    pub fn subscribe(&mut self, topic: Topic) -> (SubscriptionHandle, Option<WireOp>) {
        let id = self.next_handle;
        self.next_handle += 1;

        let connected = self.connected;
        let entry = self.topics.entry(topic.clone()).or_default();
        let first = entry.handles.is_empty();
        entry.handles.insert(id);

        let op = if first && connected {
            let wire_id = format!("sub-{}", self.next_wire_id);
            self.next_wire_id += 1;
            entry.wire_id = Some(wire_id.clone());
            Some(WireOp::Subscribe {
                wire_id,
                topic: topic.clone(),
            })
        } else {
            if first {
                debug!(topic = %topic, "transport down, subscription queued");
            }
            None
        };

        (SubscriptionHandle { id, topic }, op)
    }

    /// Drops one handle. Unknown or already released handles are a no-op.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Option<Release> {
        let entry = self.topics.get_mut(&handle.topic)?;
        if !entry.handles.remove(&handle.id) || !entry.handles.is_empty() {
            return None;
        }

        let entry = self.topics.remove(&handle.topic)?;
        let op = entry.wire_id.map(|wire_id| WireOp::Unsubscribe {
            wire_id,
            topic: handle.topic.clone(),
        });
        Some(Release {
            topic: handle.topic.clone(),
            op,
        })
    }

    /// Marks the transport as up and returns a `SUBSCRIBE` for every live
    /// topic that is not on the wire yet.
    pub fn on_connected(&mut self) -> Vec<WireOp> {
        self.connected = true;
        let mut ops = Vec::new();
        for (topic, entry) in &mut self.topics {
            if entry.wire_id.is_some() {
                continue;
            }
            let wire_id = format!("sub-{}", self.next_wire_id);
            self.next_wire_id += 1;
            entry.wire_id = Some(wire_id.clone());
            ops.push(WireOp::Subscribe {
                wire_id,
                topic: topic.clone(),
            });
        }
        ops
    }

    /// Subscriptions do not survive a transport drop.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        for entry in self.topics.values_mut() {
            entry.wire_id = None;
        }
    }

    /// Forgets every topic, returning the `UNSUBSCRIBE`s for those on the wire.
    pub fn clear(&mut self) -> Vec<WireOp> {
        self.connected = false;
        std::mem::take(&mut self.topics)
            .into_iter()
            .filter_map(|(topic, entry)| {
                entry
                    .wire_id
                    .map(|wire_id| WireOp::Unsubscribe { wire_id, topic })
            })
            .collect()
    }

    /// Live handles of `topic`.
    #[must_use]
    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, |entry| entry.handles.len())
    }

    /// Whether `topic` currently has a wire subscription.
    #[must_use]
    pub fn is_on_wire(&self, topic: &Topic) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|entry| entry.wire_id.is_some())
    }

    /// Every topic with at least one handle.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SubscriptionRegistry {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.on_connected().is_empty());
        registry
    }

    #[test]
    fn wire_ops_only_on_edges() {
        let mut registry = connected();
        let topic = Topic::conversation(42);

        let (first, op) = registry.subscribe(topic.clone());
        assert!(matches!(op, Some(WireOp::Subscribe { ref wire_id, .. }) if wire_id == "sub-0"));
        let (second, op) = registry.subscribe(topic.clone());
        assert!(op.is_none());
        assert_eq!(registry.ref_count(&topic), 2);

        assert!(registry.unsubscribe(&first).is_none());
        let release = registry.unsubscribe(&second).unwrap();
        assert_eq!(release.topic, topic);
        assert!(matches!(release.op, Some(WireOp::Unsubscribe { ref wire_id, .. }) if wire_id == "sub-0"));
        assert_eq!(registry.ref_count(&topic), 0);
    }

    #[test]
    fn double_unsubscribe_is_a_noop() {
        let mut registry = connected();
        let (handle, _) = registry.subscribe(Topic::question(7));
        assert!(registry.unsubscribe(&handle).is_some());
        assert!(registry.unsubscribe(&handle).is_none());
    }

    #[test]
    fn queued_while_disconnected_and_resubscribed_after_drop() {
        let mut registry = SubscriptionRegistry::new();
        let (kept, op) = registry.subscribe(Topic::conversation(1));
        assert!(op.is_none());
        let (dropped, _) = registry.subscribe(Topic::conversation(2));

        let ops = registry.on_connected();
        assert_eq!(ops.len(), 2);

        registry.on_disconnected();
        let release = registry.unsubscribe(&dropped).unwrap();
        assert!(release.op.is_none(), "nothing to undo on a dead socket");

        let ops = registry.on_connected();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].topic(), kept.topic());
        assert!(registry.is_on_wire(kept.topic()));
    }

    #[test]
    fn clear_undoes_everything_on_the_wire() {
        let mut registry = connected();
        registry.subscribe(Topic::conversation(1));
        registry.subscribe(Topic::notifications("user9"));
        let ops = registry.clear();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| matches!(op, WireOp::Unsubscribe { .. })));
        assert_eq!(registry.topics().count(), 0);
    }
}
