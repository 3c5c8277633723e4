//! In-memory scripted transport for exercising connection state machines
//! without a network.
//!
//! Each URL gets a [`MockBehavior`]. One-shot behaviours queued with
//! [`MockConnector::push_behavior`] take priority over the persistent one set
//! with [`MockConnector::set_behavior`]; unknown URLs accept. Every accepted
//! handshake yields a [`MockServer`] handle that the test uses to push frames
//! and observe what the client sent.
//!
//! Works with paused tokio time: `Hang` never completes, so the caller's own
//! connection timeout decides the outcome.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::transport::{WsConnector, WsFrame, WsLink};
use crate::error::{LumenError, Result};

/// How the mock answers a handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    Accept,
    /// Accept after a (virtual-time) delay.
    AcceptAfter(Duration),
    /// Fail immediately with a socket error carrying this reason.
    Refuse(String),
    /// Never complete.
    Hang,
}

#[derive(Default)]
struct Script {
    persistent: HashMap<String, MockBehavior>,
    queued: HashMap<String, VecDeque<MockBehavior>>,
    attempts: HashMap<String, usize>,
}

/// Scripted [`WsConnector`].
#[derive(Clone)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
    live: Arc<AtomicUsize>,
    peak_live: Arc<AtomicUsize>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
    servers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServer>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            live: Arc::new(AtomicUsize::new(0)),
            peak_live: Arc::new(AtomicUsize::new(0)),
            servers_tx,
            servers_rx: Arc::new(tokio::sync::Mutex::new(servers_rx)),
        }
    }

    /// Behaviour used for `url` whenever no one-shot behaviour is queued.
    pub fn set_behavior(&self, url: &str, behavior: MockBehavior) {
        self.script.lock().persistent.insert(url.to_string(), behavior);
    }

    /// Queue a behaviour for the next handshake with `url` only.
    pub fn push_behavior(&self, url: &str, behavior: MockBehavior) {
        self.script.lock().queued.entry(url.to_string()).or_default().push_back(behavior);
    }

    /// Handshakes attempted against `url` so far.
    pub fn attempts(&self, url: &str) -> usize {
        self.script.lock().attempts.get(url).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.script.lock().attempts.values().sum()
    }

    /// Links currently open (created and not yet dropped).
    pub fn live_links(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open links ever observed.
    pub fn peak_live_links(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted handshake.
    pub async fn accepted(&self) -> MockServer {
        let mut rx = self.servers_rx.lock().await;
        match rx.recv().await {
            Some(server) => server,
            // The connector holds a sender, so the channel cannot close.
            None => unreachable!("mock server channel closed"),
        }
    }

    fn next_behavior(&self, url: &str) -> MockBehavior {
        let mut script = self.script.lock();
        *script.attempts.entry(url.to_string()).or_default() += 1;
        if let Some(b) = script.queued.get_mut(url).and_then(VecDeque::pop_front) {
            return b;
        }
        script.persistent.get(url).cloned().unwrap_or(MockBehavior::Accept)
    }

    fn open_link(&self, url: &str) -> MockLink {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();

        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(now_live, Ordering::SeqCst);

        let server = MockServer { url: url.to_string(), tx: to_client_tx, rx: to_server_rx };
        let _ = self.servers_tx.send(server);
        MockLink {
            incoming: to_client_rx,
            outgoing: to_server_tx,
            live: Arc::clone(&self.live),
            closed: false,
        }
    }
}

#[async_trait]
impl WsConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsLink>> {
        match self.next_behavior(url) {
            MockBehavior::Accept => Ok(Box::new(self.open_link(url))),
            MockBehavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(self.open_link(url)))
            }
            MockBehavior::Refuse(reason) => {
                Err(LumenError::Socket { url: url.to_string(), reason })
            }
            MockBehavior::Hang => std::future::pending::<Result<Box<dyn WsLink>>>().await,
        }
    }
}

/// Client side of a mock socket.
pub struct MockLink {
    incoming: mpsc::UnboundedReceiver<WsFrame>,
    outgoing: mpsc::UnboundedSender<WsFrame>,
    live: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl WsLink for MockLink {
    async fn send(&mut self, frame: WsFrame) -> Result<()> {
        if self.closed {
            return Err(LumenError::UnexpectedClose("link already closed".into()));
        }
        self.outgoing.send(frame).map_err(|_| LumenError::UnexpectedClose("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<WsFrame>> {
        if self.closed {
            return None;
        }
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.incoming.close();
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Server side of a mock socket, held by the test.
pub struct MockServer {
    pub url: String,
    tx: mpsc::UnboundedSender<WsFrame>,
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockServer {
    /// Push a frame to the client. Returns `false` once the client is gone.
    pub fn push(&self, frame: WsFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(WsFrame::Text(text.into()))
    }

    /// Next frame the client sent, waiting if necessary. `None` once the
    /// client dropped the link.
    pub async fn next_sent(&mut self) -> Option<WsFrame> {
        self.rx.recv().await
    }

    /// Whether the client dropped or closed its side.
    pub fn is_client_gone(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a close frame and end the stream, as a server-initiated close.
    pub fn close(self) {
        let _ = self.tx.send(WsFrame::Close(Some("server closing".into())));
    }
}
