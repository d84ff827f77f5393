//! # Optimistic Mutation Reconciler
//!
//! Tracks every optimistic mutation from the moment the UI applies it until
//! one of three things happens:
//!
//! - an event carrying the same correlation id arrives on the same topic
//!   ([`MutationStatus::Confirmed`]);
//! - the REST call fails ([`MutationStatus::Failed`]);
//! - the timeout fires first ([`MutationStatus::Superseded`]).
//!
//! A successful REST response on its own does not resolve anything; it only
//! marks the entry as acknowledged. At most one mutation per `(entity, kind)`
//! may be outstanding.

use std::{collections::HashMap, future::poll_fn, time::Duration};

use serde::Serialize;
use shared::models::{CorrelationId, EntityId, EventEnvelope, LocalPayload, MutationKind, Topic};
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Lifecycle of an optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Applied locally, waiting for the server.
    Pending,
    /// The matching server event arrived.
    Confirmed,
    /// The REST call failed or the session ended; rolled back.
    Failed,
    /// Not confirmed in time; rolled back.
    Superseded,
}

impl MutationStatus {
    /// Stable name, used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }
}

/// A mutation the server has not confirmed yet.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// Token matched against event echoes.
    pub correlation_id: CorrelationId,
    /// Topic whose state the mutation touched.
    pub topic: Topic,
    /// Kind of mutation.
    pub kind: MutationKind,
    /// Local side of the mutation.
    pub payload: LocalPayload,
    /// When it was applied.
    pub submitted_at: Instant,
    /// Current status; final once resolved.
    pub status: MutationStatus,
    /// REST accepted the mutation; still waiting for the event.
    pub acknowledged: bool,
    conflict_key: Option<EntityId>,
    timer: Option<delay_queue::Key>,
}

impl PendingMutation {
    /// Id of the placeholder item this mutation put into a feed.
    #[must_use]
    pub fn local_item_id(&self) -> Option<EntityId> {
        self.kind
            .creates_item()
            .then(|| local_item_id(self.correlation_id))
    }

    /// Counter this mutation moved, if any.
    #[must_use]
    pub const fn counter_key(&self) -> Option<&EntityId> {
        self.conflict_key.as_ref()
    }
}

/// Id given to an optimistic feed item before the server names it.
#[must_use]
pub fn local_item_id(correlation_id: CorrelationId) -> EntityId {
    EntityId::new(format!("local:{correlation_id}"))
}

/// Pending mutations by correlation id, with their timers.
#[derive(Debug)]
pub struct MutationReconciler {
    timeout: Duration,
    pending: HashMap<CorrelationId, PendingMutation>,
    outstanding: HashMap<(EntityId, MutationKind), CorrelationId>,
    timers: DelayQueue<CorrelationId>,
}

impl MutationReconciler {
    /// Reconciler expiring mutations after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: HashMap::new(),
            outstanding: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Reconciliation window.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records a new optimistic mutation and starts its timer.
    ///
    /// `counter_key` is the counter a vote or reaction moves; it doubles as
    /// the entity for the one-outstanding-mutation rule.
    ///
    /// # Errors
    /// [`SyncError::Conflict`] when a mutation of the same kind is still
    /// pending for the same entity.
    pub fn begin(
        &mut self,
        topic: Topic,
        payload: LocalPayload,
        counter_key: Option<EntityId>,
    ) -> SyncResult<CorrelationId> {
        let kind = payload.kind();
        if let Some(entity_id) = &counter_key
            && self.outstanding.contains_key(&(entity_id.clone(), kind))
        {
            return Err(SyncError::Conflict {
                entity_id: entity_id.clone(),
                kind,
            });
        }

        let correlation_id = CorrelationId::new();
        let timer = self.timers.insert(correlation_id, self.timeout);
        if let Some(entity_id) = &counter_key {
            self.outstanding
                .insert((entity_id.clone(), kind), correlation_id);
        }
        debug!(correlation_id = %correlation_id, topic = %topic, kind = %kind, "mutation pending");
        self.pending.insert(
            correlation_id,
            PendingMutation {
                correlation_id,
                topic,
                kind,
                payload,
                submitted_at: Instant::now(),
                status: MutationStatus::Pending,
                acknowledged: false,
                conflict_key: counter_key,
                timer: Some(timer),
            },
        );
        Ok(correlation_id)
    }

    /// Resolves the mutation an authoritative event echoes, if any.
    pub fn match_event(&mut self, envelope: &EventEnvelope) -> Option<PendingMutation> {
        let correlation_id = envelope.correlation_id?;
        if self.pending.get(&correlation_id)?.topic != envelope.topic {
            return None;
        }
        self.resolve(correlation_id, MutationStatus::Confirmed)
    }

    /// Records a successful REST response. Returns `false` when the mutation
    /// was already resolved.
    pub fn acknowledge(&mut self, correlation_id: CorrelationId) -> bool {
        let Some(pending) = self.pending.get_mut(&correlation_id) else {
            return false;
        };
        pending.acknowledged = true;
        true
    }

    /// Resolves a mutation as failed. `None` when it already settled.
    pub fn fail(&mut self, correlation_id: CorrelationId) -> Option<PendingMutation> {
        self.resolve(correlation_id, MutationStatus::Failed)
    }

    /// Waits for the next mutation whose timer ran out.
    ///
    /// Completes with `None` immediately when no timer is armed; guard with
    /// [`MutationReconciler::has_timers`].
    pub async fn next_expired(&mut self) -> Option<PendingMutation> {
        loop {
            let expired = poll_fn(|cx| self.timers.poll_expired(cx)).await?;
            let correlation_id = expired.into_inner();
            // The queue already dropped this key.
            let Some(pending) = self.pending.get_mut(&correlation_id) else {
                continue;
            };
            pending.timer = None;
            if let Some(pending) = self.resolve(correlation_id, MutationStatus::Superseded) {
                return Some(pending);
            }
        }
    }

    /// Whether any mutation timer is armed.
    #[must_use]
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Resolves everything still pending as failed.
    pub fn drain(&mut self) -> Vec<PendingMutation> {
        self.timers.clear();
        self.outstanding.clear();
        self.pending
            .drain()
            .map(|(_, mut pending)| {
                pending.timer = None;
                pending.status = MutationStatus::Failed;
                pending
            })
            .collect()
    }

    /// Pending mutation by correlation id.
    #[must_use]
    pub fn get(&self, correlation_id: CorrelationId) -> Option<&PendingMutation> {
        self.pending.get(&correlation_id)
    }

    /// Number of pending mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn resolve(
        &mut self,
        correlation_id: CorrelationId,
        status: MutationStatus,
    ) -> Option<PendingMutation> {
        let mut pending = self.pending.remove(&correlation_id)?;
        if let Some(key) = pending.timer.take() {
            self.timers.remove(&key);
        }
        if let Some(entity_id) = &pending.conflict_key {
            self.outstanding.remove(&(entity_id.clone(), pending.kind));
        }
        pending.status = status;
        debug!(
            correlation_id = %correlation_id,
            status = status.as_str(),
            elapsed_ms = u64::try_from(pending.submitted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "mutation resolved"
        );
        Some(pending)
    }
}
