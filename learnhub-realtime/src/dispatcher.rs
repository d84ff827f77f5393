//! Frame decoding and per-topic fan-out.
//!
//! Decoding failures are logged, counted and dropped here so that a corrupt
//! frame never reaches a handler. Delivery uses bounded channels with
//! `try_send`: a slow handler loses updates instead of stalling other topics.

use std::collections::BTreeMap;

use metrics::counter;
use shared::models::{CorrelationId, EventEnvelope, MutationKind, Topic};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::{
    error::{SyncError, SyncResult},
    reconciler::MutationStatus,
    session::ConnectionState,
    transport::{Command, Frame},
};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `MESSAGE` carrying a domain event.
    Event(EventEnvelope),
    /// Bare EOL keep-alive.
    Heartbeat,
    /// `CONNECTED` outside a handshake.
    Connected,
    /// `RECEIPT` with its receipt id.
    Receipt(String),
    /// `ERROR` with the server's message.
    ServerError(String),
    /// Any other client-bound command.
    Ignored(Command),
}

/// What a topic handler is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicUpdate {
    /// An authoritative event was applied to the topic's state.
    Event(EventEnvelope),
    /// An optimistic mutation touched the topic's state.
    LocalChange {
        /// Mutation that changed the state.
        correlation_id: CorrelationId,
        /// What kind of mutation it was.
        kind: MutationKind,
    },
    /// A mutation reached a final status.
    MutationSettled {
        /// Mutation that settled.
        correlation_id: CorrelationId,
        /// Final status.
        status: MutationStatus,
    },
    /// Older items were merged into the feed.
    HistoryLoaded {
        /// Items that were new to the window.
        added: usize,
    },
    /// The connection state changed. Sent to every handler.
    Connection(ConnectionState),
}

/// Decodes frames and fans updates out to per-topic handlers.
#[derive(Debug)]
pub struct EventDispatcher {
    topic_prefix: String,
    capacity: usize,
    handlers: BTreeMap<Topic, Vec<(u64, mpsc::Sender<TopicUpdate>)>>,
}

impl EventDispatcher {
    /// Dispatcher for destinations under `topic_prefix`; handler channels hold `capacity` updates.
    pub fn new(topic_prefix: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            capacity: capacity.max(1),
            handlers: BTreeMap::new(),
        }
    }

    /// Destination prefix of realtime topics.
    #[must_use]
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Turns one raw transport frame into an [`Inbound`].
    ///
    /// # Errors
    /// [`SyncError::MalformedFrame`] for anything that is not valid STOMP, a
    /// `MESSAGE` outside the topic prefix, an undecodable body or a body whose
    /// topic disagrees with the destination.
    pub fn decode(&self, raw: &str) -> SyncResult<Inbound> {
        let result = self.decode_inner(raw);
        if let Err(err) = &result {
            counter!("learnhub_frames_malformed_total").increment(1);
            warn!(error = %err, "dropping malformed frame");
        }
        result
    }

    fn decode_inner(&self, raw: &str) -> SyncResult<Inbound> {
        let Some(frame) = Frame::decode(raw).map_err(|err| SyncError::malformed(err.to_string()))?
        else {
            return Ok(Inbound::Heartbeat);
        };

        match frame.command {
            Command::Message => {
                let destination = frame
                    .get("destination")
                    .ok_or_else(|| SyncError::malformed("MESSAGE without destination"))?;
                let topic = Topic::from_destination(destination, &self.topic_prefix)
                    .ok_or_else(|| {
                        SyncError::malformed(format!("unexpected destination {destination}"))
                    })?;
                let envelope: EventEnvelope = serde_json::from_str(&frame.body)?;
                if envelope.topic != topic {
                    return Err(SyncError::malformed(format!(
                        "event for {} delivered on {topic}",
                        envelope.topic
                    )));
                }
                Ok(Inbound::Event(envelope))
            }
            Command::Connected => Ok(Inbound::Connected),
            Command::Receipt => Ok(Inbound::Receipt(
                frame.get("receipt-id").unwrap_or_default().to_string(),
            )),
            Command::Error => {
                let message = frame
                    .get("message")
                    .map_or_else(|| frame.body.clone(), str::to_string);
                Ok(Inbound::ServerError(message))
            }
            other => Ok(Inbound::Ignored(other)),
        }
    }

    /// Adds a handler for `topic` and returns its receiving end.
    pub fn register(&mut self, topic: &Topic, handler_id: u64) -> mpsc::Receiver<TopicUpdate> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.handlers
            .entry(topic.clone())
            .or_default()
            .push((handler_id, tx));
        rx
    }

    /// Removes one handler of `topic`.
    pub fn unregister(&mut self, topic: &Topic, handler_id: u64) {
        if let Some(handlers) = self.handlers.get_mut(topic) {
            handlers.retain(|(id, _)| *id != handler_id);
            if handlers.is_empty() {
                self.handlers.remove(topic);
            }
        }
    }

    /// Number of live handlers of `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.handlers.get(topic).map_or(0, Vec::len)
    }

    /// Hands `update` to every handler of `topic` without waiting.
    /// Returns how many handlers accepted it.
    pub fn deliver(&mut self, topic: &Topic, update: &TopicUpdate) -> usize {
        let Some(handlers) = self.handlers.get_mut(topic) else {
            counter!("learnhub_events_dropped_total", "reason" => "no_handler").increment(1);
            debug!(topic = %topic, "no handler registered, update dropped");
            return 0;
        };

        let mut delivered = 0;
        handlers.retain(|(id, tx)| match tx.try_send(update.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                counter!("learnhub_events_dropped_total", "reason" => "backpressure").increment(1);
                warn!(topic = %topic, handler = id, "handler is lagging, update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(topic = %topic, handler = id, "handler went away");
                false
            }
        });
        delivered
    }

    /// Sends `update` to every handler of every topic.
    pub fn broadcast(&mut self, update: &TopicUpdate) {
        let topics: Vec<Topic> = self.handlers.keys().cloned().collect();
        for topic in topics {
            self.deliver(&topic, update);
        }
    }

    /// Drops every handler; their receivers observe end of stream.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
