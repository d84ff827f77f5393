//! Transport seam between the connection manager and the socket.
//!
//! A [`Connector`] opens one [`TransportLink`] per connection attempt. Links
//! carry STOMP text frames verbatim; framing lives in [`frame`].

pub mod frame;
pub mod memory;
pub mod ws;

use async_trait::async_trait;
use url::Url;

use crate::{error::SyncResult, session::Credential};

pub use frame::{Command, Frame, FrameError};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use ws::WsConnector;

/// Everything a connector needs to open a socket for one user.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// WebSocket endpoint.
    pub url: Url,
    /// Bearer token for the upgrade and the `CONNECT` frame.
    pub credential: Credential,
}

impl ConnectRequest {
    /// Value for the STOMP `host` header.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("localhost")
    }
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens the socket. Protocol-level handshake is left to the caller.
    ///
    /// # Errors
    /// [`crate::SyncError::Auth`] when the upgrade is refused for the
    /// credential, [`crate::SyncError::Transport`] for any other failure.
    async fn connect(&self, request: &ConnectRequest) -> SyncResult<Box<dyn TransportLink>>;
}

/// One open socket carrying STOMP text frames.
#[async_trait]
pub trait TransportLink: Send {
    /// Writes one frame.
    ///
    /// # Errors
    /// [`crate::SyncError::Transport`] when the socket is gone.
    async fn send_text(&mut self, text: String) -> SyncResult<()>;

    /// Next text frame. `None` once the peer closed the socket.
    ///
    /// Must be cancel-safe: the engine polls it inside `select!`.
    async fn recv_text(&mut self) -> Option<SyncResult<String>>;

    /// Closes the socket. Never fails.
    async fn close(&mut self);
}
