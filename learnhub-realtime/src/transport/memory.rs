//! In-process STOMP peer used by tests and offline demos.
//!
//! A [`MemoryServer`] answers `CONNECT` with `CONNECTED` (or `ERROR` once its
//! token was revoked) and `DISCONNECT` with `RECEIPT`. Everything else the
//! client sends is recorded for inspection through [`MemoryPeer`].

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use shared::models::{EventEnvelope, Topic};
use tokio::sync::mpsc;

use super::{
    ConnectRequest, Connector, TransportLink,
    frame::{Command, Frame},
};
use crate::error::{SyncError, SyncResult};

#[derive(Debug)]
struct ServerState {
    token: Option<String>,
    refuse_next: u32,
    reject_upgrade: bool,
    connections: Vec<Arc<PeerShared>>,
}

#[derive(Debug)]
struct PeerShared {
    received: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl PeerShared {
    fn push(&self, text: String) -> bool {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok())
    }

    fn close(&self) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_open(&self) -> bool {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

/// Scriptable in-process STOMP server.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    topic_prefix: String,
    message_ids: Arc<AtomicU64>,
}

impl MemoryServer {
    /// Server accepting `token` as the only valid credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                token: Some(token.into()),
                refuse_next: 0,
                reject_upgrade: false,
                connections: Vec::new(),
            })),
            topic_prefix: "/topic/".to_string(),
            message_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connector opening sockets against this server.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` socket attempts with a transport error.
    pub fn refuse_next(&self, count: u32) {
        self.lock().refuse_next = count;
    }

    /// Makes every later `CONNECT` fail with an `ERROR` frame.
    pub fn revoke_token(&self) {
        self.lock().token = None;
    }

    /// Makes every later socket upgrade fail as HTTP 401 would.
    pub fn reject_upgrades(&self) {
        self.lock().reject_upgrade = true;
    }

    /// Closes the live connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(peer) = self.current_peer() {
            peer.shared.close();
        }
    }

    /// Number of sockets opened so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// Most recently opened socket, if it is still open.
    #[must_use]
    pub fn current_peer(&self) -> Option<MemoryPeer> {
        self.lock()
            .connections
            .last()
            .filter(|shared| shared.is_open())
            .map(|shared| MemoryPeer {
                shared: Arc::clone(shared),
            })
    }

    /// All sockets ever opened, oldest first.
    #[must_use]
    pub fn peers(&self) -> Vec<MemoryPeer> {
        self.lock()
            .connections
            .iter()
            .map(|shared| MemoryPeer {
                shared: Arc::clone(shared),
            })
            .collect()
    }

    /// Sends an event to the live connection as a `MESSAGE` frame on the
    /// envelope's topic. Returns `false` when nobody is connected.
    pub fn publish(&self, envelope: &EventEnvelope) -> bool {
        let Ok(body) = serde_json::to_string(envelope) else {
            return false;
        };
        self.publish_raw(&envelope.topic, body)
    }

    /// Sends an arbitrary body on a topic's destination.
    pub fn publish_raw(&self, topic: &Topic, body: String) -> bool {
        let Some(peer) = self.current_peer() else {
            return false;
        };
        let destination = topic.destination(&self.topic_prefix);
        let subscription = peer
            .active_subscriptions()
            .into_iter()
            .find(|(_, dest)| *dest == destination)
            .map_or_else(|| "unknown".to_string(), |(id, _)| id);
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        peer.push(&Frame::message(
            &destination,
            &subscription,
            &format!("m-{message_id}"),
            body,
        ))
    }

    fn open(&self) -> SyncResult<Arc<PeerShared>> {
        let mut state = self.lock();
        if state.reject_upgrade {
            return Err(SyncError::auth("websocket upgrade rejected with 401"));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(SyncError::transport("connection refused"));
        }
        let shared = Arc::new(PeerShared {
            received: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
        });
        state.connections.push(Arc::clone(&shared));
        Ok(shared)
    }

    fn accepts(&self, frame: &Frame) -> bool {
        let state = self.lock();
        let presented = frame
            .get("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        matches!((state.token.as_deref(), presented), (Some(expected), Some(given)) if expected == given)
    }
}

/// Handle on one accepted socket.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<PeerShared>,
}

impl MemoryPeer {
    /// Sends `frame` to the client. `false` once the socket is closed.
    pub fn push(&self, frame: &Frame) -> bool {
        self.shared.push(frame.encode())
    }

    /// Sends raw text to the client, valid STOMP or not.
    pub fn push_raw(&self, text: impl Into<String>) -> bool {
        self.shared.push(text.into())
    }

    /// Frames the client sent on this socket, in order.
    #[must_use]
    pub fn received(&self) -> Vec<Frame> {
        self.shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|raw| Frame::decode(raw).ok().flatten())
            .collect()
    }

    /// Received frames carrying `command`.
    #[must_use]
    pub fn received_commands(&self, command: Command) -> Vec<Frame> {
        self.received()
            .into_iter()
            .filter(|frame| frame.command == command)
            .collect()
    }

    /// Subscription id to destination for every `SUBSCRIBE` not yet undone
    /// by an `UNSUBSCRIBE`.
    #[must_use]
    pub fn active_subscriptions(&self) -> BTreeMap<String, String> {
        let mut active = BTreeMap::new();
        for frame in self.received() {
            match frame.command {
                Command::Subscribe => {
                    if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                        active.insert(id.to_string(), destination.to_string());
                    }
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.get("id") {
                        active.remove(id);
                    }
                }
                _ => {}
            }
        }
        active
    }

    /// Whether neither side closed the socket.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

/// [`Connector`] bound to a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _request: &ConnectRequest) -> SyncResult<Box<dyn TransportLink>> {
        let shared = self.server.open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        *shared.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(Box::new(MemoryLink {
            server: self.server.clone(),
            shared,
            inbound: rx,
        }))
    }
}

#[derive(Debug)]
struct MemoryLink {
    server: MemoryServer,
    shared: Arc<PeerShared>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryLink {
    fn answer(&self, frame: &Frame) {
        match frame.command {
            Command::Connect | Command::Stomp => {
                if self.server.accepts(frame) {
                    self.shared.push(Frame::connected().encode());
                } else {
                    self.shared.push(Frame::error("invalid credentials").encode());
                }
            }
            Command::Disconnect => {
                if let Some(receipt) = frame.get("receipt") {
                    self.shared.push(Frame::receipt(receipt).encode());
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl TransportLink for MemoryLink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        if !self.shared.is_open() {
            return Err(SyncError::transport("socket closed"));
        }
        let frame = Frame::decode(&text).ok().flatten();
        self.shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        if let Some(frame) = frame {
            self.answer(&frame);
        }
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<SyncResult<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.shared.close();
    }
}
