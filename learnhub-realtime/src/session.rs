//! Connection state machine and the session record.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SyncError;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, or the session ended.
    Disconnected,
    /// First handshake in progress.
    Connecting,
    /// STOMP session established.
    Connected,
    /// Transport lost; retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Edges of the connection state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Reconnecting | Self::Disconnected)
                | (
                    Self::Reconnecting,
                    Self::Connected | Self::Disconnected | Self::Reconnecting
                )
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer token that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for headers only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One authenticated visit. Owned exclusively by the connection manager.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: String,
    credential: Credential,
    state: ConnectionState,
    last_error: Option<SyncError>,
}

impl Session {
    /// Fresh, disconnected session.
    pub fn new(user_id: impl Into<String>, credential: Credential) -> Self {
        Self {
            user_id: user_id.into(),
            credential,
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }

    /// User the session belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Credential presented on the last handshake.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Error behind the last drop or refusal.
    #[must_use]
    pub const fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub(crate) fn set_credential(&mut self, credential: Credential) {
        self.credential = credential;
    }

    pub(crate) fn record_error(&mut self, error: SyncError) {
        self.last_error = Some(error);
    }

    /// Moves the state machine along a legal edge. Illegal edges are ignored
    /// and reported as `false`.
    pub(crate) fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(
                user_id = %self.user_id,
                from = %self.state,
                to = %next,
                "ignoring illegal connection state transition"
            );
            return false;
        }
        if self.state != next {
            info!(user_id = %self.user_id, from = %self.state, to = %next, "connection state changed");
        }
        if next == ConnectionState::Connected {
            self.last_error = None;
        }
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Reconnecting));
    }

    #[test]
    fn connected_clears_last_error() {
        let mut session = Session::new("user9", Credential::new("token"));
        assert!(session.transition(ConnectionState::Connecting));
        session.record_error(SyncError::transport("refused"));
        assert!(session.transition(ConnectionState::Connected));
        assert!(session.last_error().is_none());
        assert!(!session.transition(ConnectionState::Connecting));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let session = Session::new("user9", Credential::new("super-secret"));
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("super-secret"));
        assert_eq!(session.credential().expose(), "super-secret");
    }
}
