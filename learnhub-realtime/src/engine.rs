//! # Sync Engine
//!
//! Single owner of every piece of realtime state. All mutation happens on the
//! task that drives [`SyncEngine::step`]; the only work that leaves that task
//! is the REST call behind each optimistic mutation, whose result comes back
//! through a channel.
//!
//! One call to `step` waits for exactly one of:
//!
//! - an inbound transport frame (or the transport dropping);
//! - the reconnect timer;
//! - a REST completion;
//! - a reconciliation timeout.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use metrics::counter;
use shared::{
    config::Config,
    models::{
        CorrelationId, DomainEvent, EntityId, EventEnvelope, LocalPayload, MutationAck,
        MutationRequest, Topic,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::{
    aggregator::{AggregateCounter, UNREAD_COUNTER, VoteAggregator, counter_key},
    connection::ConnectionManager,
    credentials::CredentialProvider,
    dispatcher::{EventDispatcher, Inbound, TopicUpdate},
    error::{SyncError, SyncResult},
    feed::{FeedWindow, Item},
    reconciler::{MutationReconciler, MutationStatus, PendingMutation},
    registry::{SubscriptionHandle, SubscriptionRegistry},
    rest::{HttpRestClient, RestClient},
    session::{ConnectionState, Session},
    transport::{Connector, WsConnector},
};

/// How an optimistic mutation ended: `Ok(Confirmed)` or the error that
/// rolled it back.
pub type MutationOutcome = SyncResult<MutationStatus>;

/// Handed out by [`SyncEngine::apply`]; resolves once the mutation settles.
#[derive(Debug)]
pub struct MutationTicket {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<MutationOutcome>,
    resolved: Option<MutationOutcome>,
}

impl MutationTicket {
    /// Correlation id of the mutation.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The outcome if the mutation already settled.
    pub fn try_outcome(&mut self) -> Option<MutationOutcome> {
        if self.resolved.is_none() {
            self.resolved = match self.receiver.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(SyncError::SessionClosed)),
            };
        }
        self.resolved.clone()
    }

    /// Waits for the outcome. Someone else must keep driving the engine.
    pub async fn outcome(mut self) -> MutationOutcome {
        if let Some(outcome) = self.resolved.take() {
            return outcome;
        }
        self.receiver.await.unwrap_or(Err(SyncError::SessionClosed))
    }
}

/// One caller's interest in a topic, with its stream of updates.
///
/// Dropping it releases the subscription on the engine's next step, as if
/// [`SyncEngine::unsubscribe`] had been called.
#[derive(Debug)]
pub struct TopicSubscription {
    handle: SubscriptionHandle,
    updates: mpsc::Receiver<TopicUpdate>,
    release: mpsc::UnboundedSender<SubscriptionHandle>,
}

impl TopicSubscription {
    /// Handle to pass to [`SyncEngine::unsubscribe`].
    #[must_use]
    pub const fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Topic this subscription follows.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        self.handle.topic()
    }

    /// Next update; `None` after the engine disconnected.
    pub async fn next(&mut self) -> Option<TopicUpdate> {
        self.updates.recv().await
    }

    /// Next queued update without waiting.
    pub fn try_next(&mut self) -> Option<TopicUpdate> {
        self.updates.try_recv().ok()
    }

    /// Every update queued so far.
    pub fn drain(&mut self) -> Vec<TopicUpdate> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        // Fails only once the engine is gone, which released everything.
        let _ = self.release.send(self.handle.clone());
    }
}

#[derive(Debug, Default)]
struct TopicState {
    feed: FeedWindow,
    counters: VoteAggregator,
    last_sequence: Option<u64>,
}

#[derive(Debug)]
struct Completion {
    correlation_id: CorrelationId,
    result: SyncResult<MutationAck>,
}

enum Wake {
    Frame(Option<SyncResult<String>>),
    Retry,
    Completion(Completion),
    Expired(PendingMutation),
}

/// Realtime state of one signed-in client and the session that feeds it.
pub struct SyncEngine {
    config: Config,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    reconciler: MutationReconciler,
    topics: BTreeMap<Topic, TopicState>,
    rest: Arc<dyn RestClient>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    released_tx: mpsc::UnboundedSender<SubscriptionHandle>,
    released_rx: mpsc::UnboundedReceiver<SubscriptionHandle>,
    waiters: HashMap<CorrelationId, oneshot::Sender<MutationOutcome>>,
    announced: ConnectionState,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .field("topics", &self.topics.keys().collect::<Vec<_>>())
            .field("pending", &self.reconciler.len())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Engine over any transport and REST collaborator.
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        rest: Arc<dyn RestClient>,
    ) -> Self {
        let connection = ConnectionManager::new(&config, connector, credentials);
        Self::with_connection(config, connection, rest)
    }

    /// Engine speaking STOMP over WebSocket and JSON over HTTP.
    pub fn over_websocket(config: Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        let rest = Arc::new(HttpRestClient::new(
            config.server.api_base_url.clone(),
            Arc::clone(&credentials),
        ));
        Self::new(config, Arc::new(WsConnector::new()), credentials, rest)
    }

    /// Engine around an existing connection manager.
    pub fn with_connection(
        config: Config,
        connection: ConnectionManager,
        rest: Arc<dyn RestClient>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (released_tx, released_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher: EventDispatcher::new(
                config.server.topic_prefix.clone(),
                config.dispatch.handler_capacity,
            ),
            reconciler: MutationReconciler::new(config.reconciliation.timeout()),
            config,
            connection,
            registry: SubscriptionRegistry::new(),
            topics: BTreeMap::new(),
            rest,
            completions_tx,
            completions_rx,
            released_tx,
            released_rx,
            waiters: HashMap::new(),
            announced: ConnectionState::Disconnected,
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Session of the connected user.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.connection.session()
    }

    /// Connection state for observers that do not follow a topic.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Feed window of a followed topic.
    #[must_use]
    pub fn feed(&self, topic: &Topic) -> Option<&FeedWindow> {
        self.topics.get(topic).map(|state| &state.feed)
    }

    /// Counter of `entity_id` on `topic`; use [`counter_key`] for reactions.
    #[must_use]
    pub fn counter(&self, topic: &Topic, entity_id: &EntityId) -> Option<&AggregateCounter> {
        self.topics.get(topic)?.counters.get(entity_id)
    }

    /// Live subscriptions to `topic`.
    #[must_use]
    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.registry.ref_count(topic)
    }

    /// Mutations still waiting to settle.
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.reconciler.len()
    }

    /// Opens the session and puts every live topic on the wire.
    ///
    /// # Errors
    /// [`SyncError::Auth`] or [`SyncError::Transport`] from the handshake.
    pub async fn connect(&mut self, user_id: &str) -> SyncResult<()> {
        let result = self.connection.connect(user_id).await;
        self.announce_state();
        result?;
        self.flush_subscriptions().await
    }

    /// Unsubscribes everything, closes the session and fails every pending
    /// mutation with [`SyncError::SessionClosed`]. All feeds and counters are
    /// discarded and topic update streams end.
    pub async fn disconnect(&mut self) {
        for op in self.registry.clear() {
            if let Err(err) = self.connection.send(&op).await {
                debug!(error = %err, topic = %op.topic(), "unsubscribe skipped");
                break;
            }
        }
        self.connection.disconnect().await;
        self.fail_pending(&SyncError::SessionClosed);
        self.topics.clear();
        self.announce_state();
        self.dispatcher.clear();
    }

    /// Registers interest in `topic`. The first subscriber puts the topic on
    /// the wire, or queues it until the session is up.
    pub async fn subscribe(&mut self, topic: Topic) -> TopicSubscription {
        self.collect_released().await;
        let (handle, op) = self.registry.subscribe(topic.clone());
        self.topics.entry(topic.clone()).or_default();
        let updates = self.dispatcher.register(&topic, handle.id());
        if let Some(op) = op
            && let Err(err) = self.connection.send(&op).await
        {
            self.report_lost(&err);
        }
        TopicSubscription {
            handle,
            updates,
            release: self.released_tx.clone(),
        }
    }

    /// Releases one subscription. Repeating it is a no-op. The topic's feed
    /// and counters go away with its last subscriber; in-flight REST calls
    /// are left to finish.
    pub async fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        self.dispatcher.unregister(handle.topic(), handle.id());
        let Some(release) = self.registry.unsubscribe(handle) else {
            return;
        };
        self.topics.remove(&release.topic);
        debug!(topic = %release.topic, "topic released");
        if let Some(op) = release.op
            && let Err(err) = self.connection.send(&op).await
        {
            self.report_lost(&err);
        }
    }

    /// Applies `payload` locally, then submits it over REST.
    ///
    /// # Errors
    /// [`SyncError::NotSubscribed`] when nobody follows `topic`,
    /// [`SyncError::Conflict`] when the same kind of mutation is still
    /// pending for the same entity.
    pub fn apply(&mut self, topic: &Topic, payload: LocalPayload) -> SyncResult<MutationTicket> {
        if !self.topics.contains_key(topic) {
            return Err(SyncError::NotSubscribed {
                topic: topic.clone(),
            });
        }

        let key = local_counter_key(&payload);
        let kind = payload.kind();
        let correlation_id = self
            .reconciler
            .begin(topic.clone(), payload.clone(), key.clone())
            .inspect_err(|_| {
                counter!("learnhub_mutations_total", "outcome" => "conflict").increment(1);
            })?;

        let author = self
            .connection
            .session()
            .map(|session| EntityId::new(session.user_id()));
        if let Some(state) = self.topics.get_mut(topic) {
            if let Some(body) = payload.body() {
                state.feed.insert_optimistic(correlation_id, body, author);
            } else if let (Some(key), Some((_, delta))) = (&key, payload.counter_delta())
                && state
                    .counters
                    .apply_local_delta(key, delta, correlation_id)
                    .is_none()
            {
                warn!(entity_id = %key, "counter already carries a local delta");
            }
        }
        self.dispatcher.deliver(
            topic,
            &TopicUpdate::LocalChange {
                correlation_id,
                kind,
            },
        );

        let (tx, receiver) = oneshot::channel();
        self.waiters.insert(correlation_id, tx);
        self.submit(topic.clone(), MutationRequest::from_payload(correlation_id, &payload));

        Ok(MutationTicket {
            correlation_id,
            receiver,
            resolved: None,
        })
    }

    /// Fetches the next older page of `topic` and merges it into its feed.
    /// Returns the items that were new to the window.
    ///
    /// # Errors
    /// [`SyncError::NotSubscribed`] for unknown topics, or the REST error.
    pub async fn load_older(&mut self, topic: &Topic) -> SyncResult<Vec<Item>> {
        self.collect_released().await;
        let state = self.topics.get(topic).ok_or_else(|| SyncError::NotSubscribed {
            topic: topic.clone(),
        })?;
        if !state.feed.has_more() {
            return Ok(Vec::new());
        }
        let cursor = state.feed.cursor().map(str::to_owned);
        let page = self
            .rest
            .load_page(topic, cursor.as_deref(), self.config.feed.page_size)
            .await?;

        let Some(state) = self.topics.get_mut(topic) else {
            return Ok(Vec::new());
        };
        let added = state.feed.merge_older(page);
        debug!(topic = %topic, added = added.len(), "history merged");
        self.dispatcher
            .deliver(topic, &TopicUpdate::HistoryLoaded { added: added.len() });
        Ok(added)
    }

    /// Seeds a counter from a REST snapshot so later events reconcile
    /// against it. Returns `false` when the snapshot is older than what the
    /// counter already holds.
    ///
    /// # Errors
    /// [`SyncError::NotSubscribed`] for unknown topics.
    pub fn seed_counter(
        &mut self,
        topic: &Topic,
        entity_id: &EntityId,
        count: i64,
        version: Option<u64>,
    ) -> SyncResult<bool> {
        let state = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| SyncError::NotSubscribed {
                topic: topic.clone(),
            })?;
        Ok(state.counters.apply_server_update(entity_id, count, version))
    }

    /// Waits for and handles one wake-up.
    ///
    /// # Errors
    /// Returns the fatal error once the session ended for good (credential
    /// refused or reconnect attempts exhausted).
    pub async fn step(&mut self) -> SyncResult<()> {
        // Dropped subscriptions are released in passing; they never count as
        // the wake-up.
        let wake = loop {
            let retry_at = self.connection.next_retry();
            let timers_armed = self.reconciler.has_timers();
            tokio::select! {
                frame = self.connection.recv() => break Wake::Frame(frame),
                () = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => break Wake::Retry,
                Some(completion) = self.completions_rx.recv() => break Wake::Completion(completion),
                Some(expired) = self.reconciler.next_expired(), if timers_armed => break Wake::Expired(expired),
                Some(handle) = self.released_rx.recv() => self.unsubscribe(&handle).await,
            }
        };

        match wake {
            Wake::Frame(Some(Ok(text))) => self.handle_frame(&text),
            Wake::Frame(Some(Err(err @ SyncError::MalformedFrame { .. }))) => {
                counter!("learnhub_frames_malformed_total").increment(1);
                warn!(error = %err, "dropping unreadable frame");
                Ok(())
            }
            Wake::Frame(Some(Err(err))) => self.on_transport_lost(&err),
            Wake::Frame(None) => {
                self.on_transport_lost(&SyncError::transport("connection closed by server"))
            }
            Wake::Retry => self.reconnect().await,
            Wake::Completion(completion) => {
                self.handle_completion(completion);
                Ok(())
            }
            Wake::Expired(pending) => {
                self.handle_expired(pending);
                Ok(())
            }
        }
    }

    /// Drives the engine until `cancel` fires or the session ends, then
    /// disconnects.
    ///
    /// # Errors
    /// The fatal error that ended the session.
    pub async fn run(&mut self, cancel: CancellationToken) -> SyncResult<()> {
        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                result = self.step() => {
                    if let Err(err) = result {
                        break Err(err);
                    }
                }
            }
        };
        self.disconnect().await;
        result
    }

    /// Drives the engine until `ticket` settles.
    pub async fn settle(&mut self, ticket: &mut MutationTicket) -> MutationOutcome {
        loop {
            if let Some(outcome) = ticket.try_outcome() {
                return outcome;
            }
            if let Err(err) = self.step().await {
                return ticket.try_outcome().unwrap_or(Err(err));
            }
        }
    }

    /// Releases every subscription whose owner dropped it.
    async fn collect_released(&mut self) {
        while let Ok(handle) = self.released_rx.try_recv() {
            self.unsubscribe(&handle).await;
        }
    }

    fn submit(&self, topic: Topic, request: MutationRequest) {
        let rest = Arc::clone(&self.rest);
        let completions = self.completions_tx.clone();
        let correlation_id = request.correlation_id();
        let span = debug_span!("submit", correlation_id = %correlation_id, topic = %topic);
        tokio::spawn(
            async move {
                let result = rest.submit(&topic, &request).await;
                if completions
                    .send(Completion {
                        correlation_id,
                        result,
                    })
                    .is_err()
                {
                    debug!("engine gone before the REST call finished");
                }
            }
            .instrument(span),
        );
    }

    fn handle_frame(&mut self, text: &str) -> SyncResult<()> {
        match self.dispatcher.decode(text) {
            Ok(Inbound::Event(envelope)) => self.handle_event(envelope),
            Ok(Inbound::ServerError(message)) => {
                warn!(error = %message, "server sent ERROR");
                return self.on_transport_lost(&SyncError::transport(message));
            }
            Ok(Inbound::Receipt(receipt)) => debug!(receipt = %receipt, "receipt"),
            Ok(Inbound::Heartbeat | Inbound::Connected | Inbound::Ignored(_)) | Err(_) => {}
        }
        Ok(())
    }

    fn handle_event(&mut self, envelope: EventEnvelope) {
        let Some(state) = self.topics.get_mut(&envelope.topic) else {
            counter!("learnhub_events_dropped_total", "reason" => "unsubscribed").increment(1);
            debug!(topic = %envelope.topic, "event for a released topic dropped");
            return;
        };
        if state
            .last_sequence
            .is_some_and(|last| envelope.server_sequence <= last)
        {
            counter!("learnhub_events_dropped_total", "reason" => "duplicate").increment(1);
            debug!(
                topic = %envelope.topic,
                server_sequence = envelope.server_sequence,
                "duplicate event dropped"
            );
            return;
        }
        state.last_sequence = Some(envelope.server_sequence);

        let matched = self.reconciler.match_event(&envelope);
        apply_event(state, &envelope, matched.as_ref());
        let topic = envelope.topic.clone();
        self.dispatcher.deliver(&topic, &TopicUpdate::Event(envelope));

        if let Some(pending) = matched {
            self.finish(&pending, Ok(MutationStatus::Confirmed));
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            correlation_id,
            result,
        } = completion;
        match result {
            Ok(ack) => {
                if self.reconciler.acknowledge(correlation_id) {
                    debug!(correlation_id = %correlation_id, server_id = ?ack.id, "mutation accepted, awaiting event");
                }
            }
            Err(err) => {
                let Some(pending) = self.reconciler.fail(correlation_id) else {
                    debug!(correlation_id = %correlation_id, error = %err, "late failure for a settled mutation");
                    return;
                };
                warn!(correlation_id = %correlation_id, error = %err, "mutation failed, rolling back");
                self.roll_back(&pending);
                self.finish(&pending, Err(err));
            }
        }
    }

    fn handle_expired(&mut self, pending: PendingMutation) {
        warn!(
            correlation_id = %pending.correlation_id,
            acknowledged = pending.acknowledged,
            "mutation not confirmed in time, rolling back"
        );
        self.roll_back(&pending);
        let err = SyncError::ReconciliationTimeout {
            correlation_id: pending.correlation_id,
            timeout: self.reconciler.timeout(),
        };
        self.finish(&pending, Err(err));
    }

    fn roll_back(&mut self, pending: &PendingMutation) {
        let Some(state) = self.topics.get_mut(&pending.topic) else {
            return;
        };
        if let Some(local) = pending.local_item_id() {
            state.feed.remove(&local);
        }
        if let Some(key) = pending.counter_key() {
            state.counters.rollback(key, pending.correlation_id);
        }
    }

    fn finish(&mut self, pending: &PendingMutation, outcome: MutationOutcome) {
        counter!("learnhub_mutations_total", "outcome" => pending.status.as_str()).increment(1);
        if self.topics.contains_key(&pending.topic) {
            self.dispatcher.deliver(
                &pending.topic,
                &TopicUpdate::MutationSettled {
                    correlation_id: pending.correlation_id,
                    status: pending.status,
                },
            );
        }
        if let Some(waiter) = self.waiters.remove(&pending.correlation_id)
            && waiter.send(outcome).is_err()
        {
            debug!(correlation_id = %pending.correlation_id, "ticket dropped before settling");
        }
    }

    fn fail_pending(&mut self, error: &SyncError) {
        for pending in self.reconciler.drain() {
            self.roll_back(&pending);
            self.finish(&pending, Err(error.clone()));
        }
        self.waiters.clear();
    }

    async fn reconnect(&mut self) -> SyncResult<()> {
        let result = self.connection.attempt_reconnect().await;
        self.announce_state();
        match result {
            Ok(()) => {
                info!(topics = self.registry.topics().count(), "reconnected, resubscribing");
                self.flush_subscriptions().await
            }
            Err(err) if self.connection.state() == ConnectionState::Disconnected => {
                self.end_session(&err);
                Err(err)
            }
            Err(_) => Ok(()),
        }
    }

    async fn flush_subscriptions(&mut self) -> SyncResult<()> {
        for op in self.registry.on_connected() {
            if let Err(err) = self.connection.send(&op).await {
                return self.on_transport_lost(&err);
            }
        }
        Ok(())
    }

    fn on_transport_lost(&mut self, reason: &SyncError) -> SyncResult<()> {
        self.connection.mark_lost(reason);
        self.registry.on_disconnected();
        self.announce_state();
        if self.connection.state() == ConnectionState::Disconnected {
            self.end_session(reason);
            return Err(reason.clone());
        }
        Ok(())
    }

    /// For callers that cannot propagate the error.
    fn report_lost(&mut self, reason: &SyncError) {
        if let Err(err) = self.on_transport_lost(reason) {
            warn!(error = %err, "session ended");
        }
    }

    fn end_session(&mut self, reason: &SyncError) {
        warn!(error = %reason, "session ended");
        self.registry.on_disconnected();
        self.fail_pending(&SyncError::SessionClosed);
    }

    fn announce_state(&mut self) {
        let state = self.connection.state();
        if state != self.announced {
            self.announced = state;
            self.dispatcher.broadcast(&TopicUpdate::Connection(state));
        }
    }
}

fn local_counter_key(payload: &LocalPayload) -> Option<EntityId> {
    match payload {
        LocalPayload::Vote { entity_id, .. } => Some(counter_key(entity_id, None)),
        LocalPayload::Reaction {
            entity_id,
            reaction,
            ..
        } => Some(counter_key(entity_id, Some(reaction))),
        LocalPayload::Message { .. } | LocalPayload::Answer { .. } => None,
    }
}

fn apply_event(state: &mut TopicState, envelope: &EventEnvelope, matched: Option<&PendingMutation>) {
    let sequence = envelope.server_sequence;
    match &envelope.event {
        DomainEvent::MessageCreated { payload } | DomainEvent::AnswerCreated { payload } => {
            let item = Item::from_message(payload, sequence);
            match matched.filter(|pending| pending.kind.creates_item()) {
                Some(pending) => state.feed.confirm(pending.correlation_id, item),
                None => state.feed.insert_live(item),
            };
        }
        DomainEvent::MessageEdited { payload } => {
            if !state.feed.edit(&payload.id, payload.body.clone()) {
                debug!(id = %payload.id, "edit for an item outside the window");
            }
        }
        DomainEvent::MessageDeleted { payload } => {
            state.feed.tombstone(&payload.id);
        }
        DomainEvent::VoteChanged { payload } | DomainEvent::ReactionChanged { payload } => {
            let key = counter_key(&payload.entity_id, payload.reaction.as_deref());
            state
                .counters
                .apply_server_update(&key, payload.count, payload.version);
        }
        DomainEvent::NotificationCreated { payload } => {
            state
                .feed
                .insert_live(Item::from_notification(payload, sequence));
            if let Some(unread) = payload.unread_count {
                state
                    .counters
                    .apply_server_update(&EntityId::new(UNREAD_COUNTER), unread, None);
            }
        }
    }

    // Whatever the event was, the matched mutation's local traces go now.
    if let Some(pending) = matched {
        if let Some(local) = pending.local_item_id() {
            state.feed.remove(&local);
        }
        if let Some(key) = pending.counter_key() {
            state.counters.settle(key, pending.correlation_id);
        }
    }
}
