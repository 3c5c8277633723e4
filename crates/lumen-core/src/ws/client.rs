//! Production WebSocket transport on top of `tokio-tungstenite`.
//!
//! The connector only performs the handshake. Reconnection, keep-alive and
//! idle supervision belong to the component that owns the link (endpoint
//! manager or feed adapter), so each one can apply its own policy.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::transport::{WsConnector, WsFrame, WsLink};
use crate::error::{LumenError, Result};

type TungsteniteStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens TLS/plain WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsLink>> {
        let stream = connect_ws(url).await?;
        Ok(Box::new(TungsteniteLink { url: url.to_string(), stream, closed: false }))
    }
}

/// An open `tokio-tungstenite` socket.
pub struct TungsteniteLink {
    url: String,
    stream: TungsteniteStream,
    closed: bool,
}

#[async_trait]
impl WsLink for TungsteniteLink {
    async fn send(&mut self, frame: WsFrame) -> Result<()> {
        let msg = match frame {
            WsFrame::Text(t) => Message::Text(t.into()),
            WsFrame::Binary(b) => Message::Binary(b.into()),
            WsFrame::Ping(p) => Message::Ping(p.into()),
            WsFrame::Pong(p) => Message::Pong(p.into()),
            WsFrame::Close(_) => Message::Close(None),
        };
        self.stream.send(msg).await.map_err(|e| socket_error(&self.url, e))
    }

    async fn recv(&mut self) -> Option<Result<WsFrame>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(socket_error(&self.url, e))),
            };
            let frame = match msg {
                Message::Text(text) => WsFrame::Text(text.as_str().to_owned()),
                Message::Binary(data) => WsFrame::Binary(data.to_vec()),
                Message::Ping(data) => WsFrame::Ping(data.to_vec()),
                Message::Pong(data) => WsFrame::Pong(data.to_vec()),
                Message::Close(frame) => {
                    WsFrame::Close(frame.map(|f| f.reason.as_str().to_owned()))
                }
                // Raw frames are never surfaced while reading.
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("[ws] close handshake with {} failed: {e}", self.url);
        }
    }
}

fn socket_error(url: &str, e: impl std::fmt::Display) -> LumenError {
    LumenError::Socket { url: url.to_string(), reason: e.to_string() }
}

/// Establish a WebSocket connection (TLS when the scheme is `wss`).
async fn connect_ws(url: &str) -> Result<TungsteniteStream> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let request = url.into_client_request().map_err(|e| socket_error(url, e))?;
    let (stream, _response) =
        tokio_tungstenite::connect_async(request).await.map_err(|e| socket_error(url, e))?;
    Ok(stream)
}
