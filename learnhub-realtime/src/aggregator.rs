//! Vote scores, reaction counts and unread badges.
//!
//! The displayed value is the server's count plus at most one outstanding
//! local delta. Versioned server updates are applied only when their version
//! is not older than the one already held; unversioned updates are taken as
//! ground truth.

use std::collections::HashMap;

use serde::Serialize;
use shared::models::{CorrelationId, EntityId};
use tracing::debug;

/// Counter key for the per-topic unread badge of a notification feed.
pub const UNREAD_COUNTER: &str = "unread";

/// Key of the counter a vote or reaction moves. Reactions count per emoji.
#[must_use]
pub fn counter_key(entity_id: &EntityId, reaction: Option<&str>) -> EntityId {
    match reaction {
        Some(reaction) => EntityId::new(format!("{entity_id}#{reaction}")),
        None => entity_id.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalDelta {
    #[serde(skip)]
    correlation_id: CorrelationId,
    delta: i64,
}

/// Server count of one entity plus an optional local delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCounter {
    /// Counter key, see [`counter_key`].
    pub entity_id: EntityId,
    /// Last value the server vouched for.
    pub count: i64,
    /// Version of `count`, when the server sends one.
    pub version: Option<u64>,
    pending: Option<LocalDelta>,
}

impl AggregateCounter {
    /// Zeroed counter.
    #[must_use]
    pub const fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            count: 0,
            version: None,
            pending: None,
        }
    }

    /// Value to render.
    #[must_use]
    pub fn displayed(&self) -> i64 {
        self.count + self.pending.map_or(0, |pending| pending.delta)
    }

    /// Whether a local delta is outstanding.
    #[must_use]
    pub const fn has_pending_delta(&self) -> bool {
        self.pending.is_some()
    }
}

/// Counters of one topic, keyed by [`counter_key`].
#[derive(Debug, Clone, Default)]
pub struct VoteAggregator {
    counters: HashMap<EntityId, AggregateCounter>,
}

impl VoteAggregator {
    /// Empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an optimistic delta. Returns the new displayed value, or `None`
    /// when another local delta is still outstanding for the entity.
    pub fn apply_local_delta(
        &mut self,
        entity_id: &EntityId,
        delta: i64,
        correlation_id: CorrelationId,
    ) -> Option<i64> {
        let counter = self
            .counters
            .entry(entity_id.clone())
            .or_insert_with(|| AggregateCounter::new(entity_id.clone()));
        if counter.pending.is_some() {
            return None;
        }
        counter.pending = Some(LocalDelta {
            correlation_id,
            delta,
        });
        Some(counter.displayed())
    }

    /// Applies an authoritative count. Returns `false` for a stale version.
    pub fn apply_server_update(
        &mut self,
        entity_id: &EntityId,
        count: i64,
        version: Option<u64>,
    ) -> bool {
        let counter = self
            .counters
            .entry(entity_id.clone())
            .or_insert_with(|| AggregateCounter::new(entity_id.clone()));

        if let (Some(incoming), Some(current)) = (version, counter.version)
            && incoming < current
        {
            debug!(entity_id = %entity_id, incoming, current, "ignoring stale counter update");
            return false;
        }
        counter.count = count;
        if version.is_some() {
            counter.version = version;
        }
        true
    }

    /// Drops the local delta of a confirmed mutation; the server's count
    /// already includes it.
    pub fn settle(&mut self, entity_id: &EntityId, correlation_id: CorrelationId) -> bool {
        self.take_delta(entity_id, correlation_id)
    }

    /// Drops the local delta of a failed mutation, restoring the last value
    /// the server vouched for.
    pub fn rollback(&mut self, entity_id: &EntityId, correlation_id: CorrelationId) -> bool {
        self.take_delta(entity_id, correlation_id)
    }

    /// Counter for `entity_id`, if any update reached it.
    #[must_use]
    pub fn get(&self, entity_id: &EntityId) -> Option<&AggregateCounter> {
        self.counters.get(entity_id)
    }

    /// Every counter, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &AggregateCounter> {
        self.counters.values()
    }

    fn take_delta(&mut self, entity_id: &EntityId, correlation_id: CorrelationId) -> bool {
        let Some(counter) = self.counters.get_mut(entity_id) else {
            return false;
        };
        if counter
            .pending
            .is_some_and(|pending| pending.correlation_id == correlation_id)
        {
            counter.pending = None;
            return true;
        }
        false
    }
}
