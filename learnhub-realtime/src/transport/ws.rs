//! STOMP over a real WebSocket via `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{HeaderValue, header},
        protocol::Message,
    },
};
use tracing::{debug, warn};

use super::{ConnectRequest, Connector, TransportLink};
use crate::error::{SyncError, SyncResult};

const STOMP_SUBPROTOCOL: &str = "v12.stomp";

/// Opens STOMP sessions over a real WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Connector with default socket settings.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> SyncResult<Box<dyn TransportLink>> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| SyncError::transport(format!("invalid websocket request: {err}")))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", request.credential.expose()))
            .map_err(|_| SyncError::auth("credential is not a valid header value"))?;
        upgrade.headers_mut().insert(header::AUTHORIZATION, bearer);
        upgrade.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(STOMP_SUBPROTOCOL),
        );

        debug!(url = %request.url, "opening websocket");
        match connect_async(upgrade).await {
            Ok((stream, _response)) => Ok(Box::new(WsLink { stream })),
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status().as_u16();
                match status {
                    401 | 403 => Err(SyncError::auth(format!(
                        "websocket upgrade rejected with {status}"
                    ))),
                    code => Err(SyncError::transport(format!(
                        "websocket upgrade failed with HTTP {code}"
                    ))),
                }
            }
            Err(err) => Err(SyncError::transport(format!("connection failed: {err}"))),
        }
    }
}

#[derive(Debug)]
struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|err| SyncError::transport(err.to_string()))
    }

    async fn recv_text(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(err) => {
                        counter!("learnhub_frames_malformed_total").increment(1);
                        warn!(error = %err, "dropping binary frame that is not UTF-8");
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by server");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(err) => {
                    warn!(error = %err, "websocket read failed");
                    return Some(Err(SyncError::transport(err.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close failed");
        }
    }
}
