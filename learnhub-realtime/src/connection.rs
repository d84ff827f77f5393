//! # Connection Manager
//!
//! Owns the [`Session`] and the one live transport link. Reconnection is
//! driven from outside: after [`ConnectionManager::mark_lost`] the caller
//! waits until [`ConnectionManager::next_retry`] and then calls
//! [`ConnectionManager::attempt_reconnect`]. Nothing here blocks on a timer.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use shared::config::Config;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backoff::Backoff,
    credentials::CredentialProvider,
    error::{SyncError, SyncResult},
    registry::WireOp,
    session::{ConnectionState, Credential, Session},
    transport::{Command, ConnectRequest, Connector, Frame, TransportLink},
};

const DISCONNECT_RECEIPT: &str = "disconnect";

/// Owns the socket, the session record and the reconnect schedule.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    url: Url,
    topic_prefix: String,
    connect_timeout: Duration,
    backoff: Backoff,
    session: Option<Session>,
    link: Option<Box<dyn TransportLink>>,
    retry_at: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url.as_str())
            .field("session", &self.session)
            .field("linked", &self.link.is_some())
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager using the configured backoff policy.
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::with_backoff(config, connector, credentials, Backoff::new(&config.reconnect))
    }

    /// Manager with an explicit backoff, e.g. a seeded one in tests.
    pub fn with_backoff(
        config: &Config,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        backoff: Backoff,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            credentials,
            url: config.server.websocket_url.clone(),
            topic_prefix: config.server.topic_prefix.clone(),
            connect_timeout: Duration::from_millis(config.server.connect_timeout_ms),
            backoff,
            session: None,
            link: None,
            retry_at: None,
            state_tx,
        }
    }

    /// Current state; `Disconnected` without a session.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, Session::state)
    }

    /// Session of the signed-in user, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Watch channel following every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    #[must_use]
    pub const fn next_retry(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Opens a session for `user_id` and completes the STOMP handshake.
    ///
    /// # Errors
    /// [`SyncError::Auth`] when no token is available or the server refuses
    /// it, [`SyncError::Transport`] when the socket cannot be established.
    pub async fn connect(&mut self, user_id: &str) -> SyncResult<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.abandon_link().await;

        let Some(token) = self.credentials.get_token().await else {
            let err = SyncError::auth("no credential available");
            self.session = None;
            self.publish_state();
            return Err(err);
        };

        let mut session = Session::new(user_id, Credential::new(token));
        session.transition(ConnectionState::Connecting);
        self.session = Some(session);
        self.publish_state();

        match self.open().await {
            Ok(link) => {
                self.link = Some(link);
                self.backoff.reset();
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                warn!(user_id, error = %err, "connect failed");
                if let Some(session) = self.session.as_mut() {
                    session.record_error(err.clone());
                }
                self.transition(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Sends `DISCONNECT`, waits briefly for the receipt and closes the link.
    pub async fn disconnect(&mut self) {
        self.retry_at = None;
        if let Some(mut link) = self.link.take() {
            let goodbye = Frame::disconnect(DISCONNECT_RECEIPT).encode();
            if link.send_text(goodbye).await.is_ok() {
                let wait = async {
                    while let Some(Ok(text)) = link.recv_text().await {
                        if matches!(Frame::decode(&text), Ok(Some(frame)) if frame.command == Command::Receipt)
                        {
                            break;
                        }
                    }
                };
                if tokio::time::timeout(self.connect_timeout, wait).await.is_err() {
                    debug!("no receipt for DISCONNECT");
                }
            }
            link.close().await;
        }
        self.transition(ConnectionState::Disconnected);
        self.backoff.reset();
        info!("session closed");
    }

    /// Records a transport drop and schedules the first reconnect attempt.
    pub fn mark_lost(&mut self, reason: &SyncError) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        warn!(error = %reason, "transport lost");
        self.link = None;
        if let Some(session) = self.session.as_mut() {
            session.record_error(reason.clone());
        }
        self.transition(ConnectionState::Reconnecting);
        self.schedule_retry();
    }

    /// Runs one reconnect attempt. On a non-fatal failure the next attempt is
    /// scheduled; once attempts are exhausted or the credential is refused
    /// the session ends in `Disconnected`.
    ///
    /// # Errors
    /// The error of the failed attempt.
    pub async fn attempt_reconnect(&mut self) -> SyncResult<()> {
        if self.state() != ConnectionState::Reconnecting {
            return Ok(());
        }
        self.retry_at = None;
        counter!("learnhub_reconnects_total").increment(1);
        info!(attempt = self.backoff.attempt(), "reconnecting");

        let result = match self.credentials.get_token().await {
            Some(token) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_credential(Credential::new(token));
                }
                self.open().await
            }
            None => Err(SyncError::auth("credential no longer available")),
        };

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.backoff.reset();
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                if let Some(session) = self.session.as_mut() {
                    session.record_error(err.clone());
                }
                if err.is_fatal() {
                    warn!(error = %err, "reconnect refused, giving up");
                    self.transition(ConnectionState::Disconnected);
                } else {
                    debug!(error = %err, "reconnect attempt failed");
                    self.transition(ConnectionState::Reconnecting);
                    self.schedule_retry();
                }
                Err(err)
            }
        }
    }

    /// Sends a `SUBSCRIBE` or `UNSUBSCRIBE` for `op`.
    ///
    /// # Errors
    /// [`SyncError::Transport`] when no link is up or the write fails.
    pub async fn send(&mut self, op: &WireOp) -> SyncResult<()> {
        let frame = match op {
            WireOp::Subscribe { wire_id, topic } => {
                Frame::subscribe(wire_id, &topic.destination(&self.topic_prefix))
            }
            WireOp::Unsubscribe { wire_id, .. } => Frame::unsubscribe(wire_id),
        };
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| SyncError::transport("not connected"))?;
        link.send_text(frame.encode()).await
    }

    /// Next inbound text frame. Never completes while there is no link.
    pub async fn recv(&mut self) -> Option<SyncResult<String>> {
        match self.link.as_mut() {
            Some(link) => link.recv_text().await,
            None => std::future::pending().await,
        }
    }

    async fn open(&self) -> SyncResult<Box<dyn TransportLink>> {
        let session = self
            .session
            .as_ref()
            .ok_or(SyncError::SessionClosed)?;
        let request = ConnectRequest {
            url: self.url.clone(),
            credential: session.credential().clone(),
        };

        let handshake = async {
            let mut link = self.connector.connect(&request).await?;
            link.send_text(Frame::connect(request.host(), request.credential.expose()).encode())
                .await?;
            loop {
                let text = match link.recv_text().await {
                    Some(Ok(text)) => text,
                    Some(Err(err)) => return Err(err),
                    None => return Err(SyncError::transport("socket closed during handshake")),
                };
                match Frame::decode(&text) {
                    Ok(Some(frame)) if frame.command == Command::Connected => return Ok(link),
                    Ok(Some(frame)) if frame.command == Command::Error => {
                        let message = frame.get("message").unwrap_or("connection refused");
                        return Err(SyncError::auth(message.to_string()));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(SyncError::malformed(err.to_string())),
                }
            }
        };

        tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| SyncError::transport("handshake timed out"))?
    }

    async fn abandon_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.retry_at = None;
    }

    fn schedule_retry(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnect scheduled");
                self.retry_at = Some(Instant::now() + delay);
            }
            None => {
                warn!("reconnect attempts exhausted");
                self.retry_at = None;
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if let Some(session) = self.session.as_mut() {
            session.transition(next);
        }
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{credentials::StaticCredentials, transport::MemoryServer};

    fn manager(server: &MemoryServer, credentials: Arc<StaticCredentials>) -> ConnectionManager {
        let mut config = Config::with_defaults();
        config.reconnect.jitter = 0.0;
        let backoff = Backoff::with_rng(&config.reconnect, StdRng::seed_from_u64(3));
        ConnectionManager::with_backoff(
            &config,
            Arc::new(server.connector()),
            credentials,
            backoff,
        )
    }

    #[tokio::test]
    async fn connect_completes_stomp_handshake() {
        let server = MemoryServer::new("token");
        let mut manager = manager(&server, Arc::new(StaticCredentials::new("token")));
        let mut states = manager.subscribe_state();

        manager.connect("user9").await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        let peer = server.current_peer().unwrap();
        let connect = &peer.received_commands(Command::Connect)[0];
        assert_eq!(connect.get("Authorization"), Some("Bearer token"));
        assert_eq!(connect.get("accept-version"), Some("1.2"));
    }

    #[tokio::test]
    async fn bad_or_missing_credentials_are_auth_errors() {
        let server = MemoryServer::new("token");
        let mut manager = manager(&server, Arc::new(StaticCredentials::new("wrong")));
        let err = manager.connect("user9").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth { .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.session().unwrap().last_error().is_some());

        let mut manager = manager_signed_out(&server);
        assert!(matches!(
            manager.connect("user9").await,
            Err(SyncError::Auth { .. })
        ));
    }

    fn manager_signed_out(server: &MemoryServer) -> ConnectionManager {
        manager(server, Arc::new(StaticCredentials::signed_out()))
    }

    #[tokio::test]
    async fn refused_socket_is_a_transport_error() {
        let server = MemoryServer::new("token");
        server.refuse_next(1);
        let mut manager = manager(&server, Arc::new(StaticCredentials::new("token")));
        assert!(matches!(
            manager.connect("user9").await,
            Err(SyncError::Transport { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_transport_retries_with_backoff() {
        let server = MemoryServer::new("token");
        let mut manager = manager(&server, Arc::new(StaticCredentials::new("token")));
        manager.connect("user9").await.unwrap();

        server.refuse_next(1);
        manager.mark_lost(&SyncError::transport("reset"));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        let first = manager.next_retry().unwrap();
        assert_eq!(first - Instant::now(), Duration::from_millis(500));

        assert!(manager.attempt_reconnect().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        let second = manager.next_retry().unwrap();
        assert_eq!(second - Instant::now(), Duration::from_millis(1_000));

        manager.attempt_reconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.next_retry().is_none());
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn revoked_credential_ends_the_session() {
        let server = MemoryServer::new("token");
        let credentials = Arc::new(StaticCredentials::new("token"));
        let mut manager = manager(&server, Arc::clone(&credentials));
        manager.connect("user9").await.unwrap();

        credentials.set_token(None);
        manager.mark_lost(&SyncError::transport("reset"));
        let err = manager.attempt_reconnect().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.next_retry().is_none());
    }

    #[tokio::test]
    async fn disconnect_says_goodbye() {
        let server = MemoryServer::new("token");
        let mut manager = manager(&server, Arc::new(StaticCredentials::new("token")));
        manager.connect("user9").await.unwrap();
        let peer = server.current_peer().unwrap();

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(peer.received_commands(Command::Disconnect).len(), 1);
        assert!(!peer.is_open());
    }
}
