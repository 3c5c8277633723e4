//! Transport seam between connection state machines and the actual socket.
//!
//! The endpoint manager and the feed adapters only speak to [`WsConnector`]
//! and [`WsLink`]. Production wiring uses
//! [`TungsteniteConnector`](super::client::TungsteniteConnector); tests use
//! the in-memory `MockConnector`.

use async_trait::async_trait;

use crate::error::Result;

/// A WebSocket frame, independent of the underlying library.
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close frame with an optional reason.
    Close(Option<String>),
}

impl WsFrame {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

/// Ping payload format. Varies by exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum PingPayload {
    /// Send a text frame (e.g. OKX sends `"ping"`).
    Text(String),
    /// Send a JSON object as text (e.g. Bybit `{"op":"ping"}`).
    Json(serde_json::Value),
    /// Use the standard WebSocket ping frame.
    WebSocketPing,
}

impl PingPayload {
    pub fn to_frame(&self) -> WsFrame {
        match self {
            Self::Text(t) => WsFrame::Text(t.clone()),
            Self::Json(j) => WsFrame::Text(j.to_string()),
            Self::WebSocketPing => WsFrame::Ping(Vec::new()),
        }
    }
}

/// One open socket, exclusively owned by the task that opened it.
#[async_trait]
pub trait WsLink: Send {
    /// Send one frame.
    async fn send(&mut self, frame: WsFrame) -> Result<()>;

    /// Next inbound frame. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<WsFrame>>;

    /// Best-effort close handshake. The link must not be used afterwards.
    async fn close(&mut self);
}

/// Opens sockets. Shared by every component that needs one.
#[async_trait]
pub trait WsConnector: Send + Sync {
    /// Complete the handshake with `url`. The caller applies its own timeout.
    async fn connect(&self, url: &str) -> Result<Box<dyn WsLink>>;
}
