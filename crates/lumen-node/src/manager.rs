//! Endpoint connection manager (ECM).
//!
//! Holds at most one live socket to a ledger network. `connect()` sweeps the
//! ranked endpoint list once, primary first, with a per-candidate handshake
//! timeout, and pins whichever endpoint answers first. After a verified
//! connection an unsolicited close starts bounded background reconnection:
//! every retry is a full ranked sweep, spaced by exponential backoff. When the
//! retry budget runs out the state becomes `Error` and only an explicit
//! `connect()` starts over.
//!
//! All socket I/O runs on one supervisor task per `connect()` call. Each task
//! carries the generation it was spawned for. `connect()` and `disconnect()`
//! bump the generation, so anything a superseded task tries to change is
//! dropped before it reaches the shared state or the observers.

use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use lumen_core::backoff::Backoff;
use lumen_core::config::NetworkConfig;
use lumen_core::events::EventBus;
use lumen_core::ws::{WsConnector, WsFrame, WsLink};
use lumen_core::{ConnectionState, LumenError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::NodeEvent;
use crate::handle::{LedgerHandle, PendingRequests, Request};

/// Result of one `connect()` sweep, shared by every caller that joined it.
type SharedConnect = Shared<BoxFuture<'static, Result<String>>>;

struct InFlight {
    network: String,
    result: SharedConnect,
}

/// Shutdown switch and join handle of one supervisor task.
struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Signal the task and wait until it has released its socket.
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[derive(Default)]
struct ManagerState {
    status: ConnectionState,
    network: Option<NetworkConfig>,
    pinned_url: Option<String>,
    generation: u64,
    inflight: Option<InFlight>,
    supervisor: Option<Supervisor>,
    handle: Option<LedgerHandle>,
    reconnect_attempt: u32,
}

struct Inner {
    connector: Arc<dyn WsConnector>,
    events: EventBus<NodeEvent>,
    state: Mutex<ManagerState>,
    /// Held across a generation check and the matching event delivery, so a
    /// superseded task cannot publish after the call that superseded it.
    publish: Mutex<()>,
}

impl Inner {
    /// Apply `change` and deliver `event` if `generation` is still current.
    fn transition(
        &self,
        generation: u64,
        change: impl FnOnce(&mut ManagerState),
        event: NodeEvent,
    ) -> bool {
        let _publish = self.publish.lock();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            change(&mut state);
        }
        self.events.emit(&event);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.state.get_mut().supervisor.take() {
            supervisor.task.abort();
        }
    }
}

/// Connection manager for one ledger network at a time.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn WsConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                events: EventBus::new(),
                state: Mutex::new(ManagerState::default()),
                publish: Mutex::new(()),
            }),
        }
    }

    /// Connect to `network` and return the pinned endpoint URL.
    ///
    /// Returns immediately when already connected to the same network id.
    /// Concurrent calls for the same network share one sweep and never open
    /// a second socket. A different network replaces the current connection.
    /// Fails with `Config` before any I/O for a malformed descriptor, with
    /// `AllEndpointsFailed` once every candidate failed, and with `Superseded`
    /// when a later `connect()` or `disconnect()` overtook this one.
    pub async fn connect(&self, network: &NetworkConfig) -> Result<String> {
        network.validate()?;
        self.begin_connect(network).await
    }

    fn begin_connect(&self, network: &NetworkConfig) -> SharedConnect {
        let mut state = self.inner.state.lock();

        let same_network = state.network.as_ref().is_some_and(|n| n.id == network.id);
        if same_network && state.status == ConnectionState::Connected {
            if let Some(url) = state.pinned_url.clone() {
                debug!("[ecm] already connected to {} via {url}", network.id);
                return async move { Ok::<_, LumenError>(url) }.boxed().shared();
            }
        }
        if let Some(inflight) = &state.inflight {
            if inflight.network == network.id {
                debug!("[ecm] joining in-flight connect to {}", network.id);
                return inflight.result.clone();
            }
        }

        state.generation += 1;
        let generation = state.generation;
        // Only a live connection is announced as replaced. A lost one was
        // already reported and a pending one never connected.
        let previous_network = match state.status {
            ConnectionState::Connected => state.network.as_ref().map(|n| n.id.clone()),
            _ => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (result_tx, result_rx) = oneshot::channel();
        let task = ConnectionTask {
            inner: Arc::downgrade(&self.inner),
            connector: Arc::clone(&self.inner.connector),
            generation,
            network: network.clone(),
            backoff: Backoff::new(network.backoff_policy()),
            shutdown: shutdown_rx,
            previous: state.supervisor.take(),
            previous_network,
        };
        info!("[ecm] connecting to {} (generation {generation})", network.id);
        let handle = tokio::spawn(task.run(result_tx));

        let result = async move { result_rx.await.unwrap_or(Err(LumenError::Superseded)) }
            .boxed()
            .shared();
        state.status = ConnectionState::Connecting;
        state.network = Some(network.clone());
        state.pinned_url = None;
        state.handle = None;
        state.reconnect_attempt = 0;
        state.inflight = Some(InFlight { network: network.id.clone(), result: result.clone() });
        state.supervisor = Some(Supervisor { shutdown: shutdown_tx, task: handle });
        result
    }

    /// Drop the connection: cancels any pending handshake or reconnect
    /// timer, releases the socket and resets the retry counter. Resolves once
    /// the socket is gone. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        let supervisor = {
            let _publish = self.inner.publish.lock();
            let (supervisor, announce) = {
                let mut state = self.inner.state.lock();
                state.generation += 1;
                state.inflight = None;
                state.handle = None;
                state.pinned_url = None;
                state.reconnect_attempt = 0;
                let was = std::mem::replace(&mut state.status, ConnectionState::Disconnected);
                let network = state.network.take();
                let announce = match was {
                    ConnectionState::Disconnected => None,
                    _ => network.map(|n| n.id),
                };
                (state.supervisor.take(), announce)
            };
            if let Some(network) = announce {
                info!("[ecm] disconnecting from {network}");
                let reason = "disconnect requested".to_string();
                self.inner.events.emit(&NodeEvent::Disconnected { network, reason });
            }
            supervisor
        };

        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
        }
    }

    pub fn events(&self) -> &EventBus<NodeEvent> {
        &self.inner.events
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Endpoint that won the last successful sweep for the current network.
    pub fn pinned_url(&self) -> Option<String> {
        self.inner.state.lock().pinned_url.clone()
    }

    pub fn network_id(&self) -> Option<String> {
        self.inner.state.lock().network.as_ref().map(|n| n.id.clone())
    }

    /// Request handle on the live connection. `Some` only while connected.
    pub fn handle(&self) -> Option<LedgerHandle> {
        let state = self.inner.state.lock();
        match state.status {
            ConnectionState::Connected => state.handle.clone(),
            _ => None,
        }
    }

    /// Background retries scheduled since the last verified connection.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.state.lock().reconnect_attempt
    }
}

enum Sweep {
    Open(String, Box<dyn WsLink>),
    Failed(LumenError),
    Cancelled,
}

enum SessionEnd {
    Shutdown,
    Lost(LumenError),
}

/// Supervisor for one generation: initial sweep, session, reconnects.
struct ConnectionTask {
    inner: Weak<Inner>,
    connector: Arc<dyn WsConnector>,
    generation: u64,
    network: NetworkConfig,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
    /// Supervisor of the generation this one replaces.
    previous: Option<Supervisor>,
    previous_network: Option<String>,
}

impl ConnectionTask {
    async fn run(mut self, result_tx: oneshot::Sender<Result<String>>) {
        // Never two live sockets: the old one is gone before the sweep starts.
        if let Some(previous) = self.previous.take() {
            previous.stop().await;
        }
        if let Some(network) = self.previous_network.take() {
            let reason = format!("replaced by connect to {}", self.network.id);
            self.transition(|_| {}, NodeEvent::Disconnected { network, reason });
        }

        let (mut url, mut link) = match self.sweep().await {
            Sweep::Open(url, link) => (url, link),
            Sweep::Failed(err) => {
                error!("[ecm] {}: {err}", self.network.id);
                let network = self.network.id.clone();
                let event = NodeEvent::Error { network, error: err.clone() };
                self.transition(
                    |state| {
                        state.status = ConnectionState::Error;
                        state.inflight = None;
                    },
                    event,
                );
                let _ = result_tx.send(Err(err));
                return;
            }
            // Dropping `result_tx` reports `Superseded` to the callers.
            Sweep::Cancelled => return,
        };

        let Some(mut requests) = self.on_connected(&url) else {
            link.close().await;
            return;
        };
        let _ = result_tx.send(Ok(url.clone()));

        loop {
            let reason = match self.session(&url, link, requests).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Lost(reason) => reason,
            };
            warn!("[ecm] {} connection to {url} lost: {reason}", self.network.id);
            let network = self.network.id.clone();
            let event = NodeEvent::Disconnected { network, reason: reason.to_string() };
            let still_current = self.transition(
                |state| {
                    state.status = ConnectionState::Disconnected;
                    state.handle = None;
                },
                event,
            );
            if !still_current {
                return;
            }

            (url, link) = match self.reconnect(reason).await {
                Some(open) => open,
                None => return,
            };
            requests = match self.on_connected(&url) {
                Some(requests) => requests,
                None => {
                    link.close().await;
                    return;
                }
            };
        }
    }

    fn transition(&self, change: impl FnOnce(&mut ManagerState), event: NodeEvent) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.transition(self.generation, change, event),
            None => false,
        }
    }

    /// Publish `Connected` and hand out a fresh request handle.
    fn on_connected(&mut self, url: &str) -> Option<mpsc::Receiver<Request>> {
        let (handle, requests) =
            LedgerHandle::channel(&self.network.id, url, self.network.request_timeout());
        let event = NodeEvent::Connected { network: self.network.id.clone(), url: url.to_string() };
        let connected = self.transition(
            |state| {
                state.status = ConnectionState::Connected;
                state.pinned_url = Some(url.to_string());
                state.handle = Some(handle);
                state.inflight = None;
                state.reconnect_attempt = 0;
            },
            event,
        );
        if connected {
            self.backoff.reset();
            info!("[ecm] {} connected, pinned {url}", self.network.id);
        }
        connected.then_some(requests)
    }

    /// Try every endpoint once in rank order. First handshake wins.
    async fn sweep(&mut self) -> Sweep {
        let endpoints = self.network.endpoints();
        let timeout = self.network.connect_timeout();
        let connector = Arc::clone(&self.connector);
        let mut last = None;

        for endpoint in &endpoints {
            let network = self.network.id.clone();
            let event = NodeEvent::Connecting { network, url: endpoint.url.clone() };
            if !self.transition(|state| state.status = ConnectionState::Connecting, event) {
                return Sweep::Cancelled;
            }
            debug!("[ecm] trying {endpoint}");

            let outcome = tokio::select! {
                res = tokio::time::timeout(timeout, connector.connect(&endpoint.url)) => res,
                _ = self.shutdown.changed() => return Sweep::Cancelled,
            };
            let err = match outcome {
                Ok(Ok(link)) => return Sweep::Open(endpoint.url.clone(), link),
                Ok(Err(e)) => e,
                Err(_) => LumenError::ConnectionTimeout { url: endpoint.url.clone(), timeout },
            };
            warn!("[ecm] {endpoint} failed: {err}");
            last = Some(err);
        }

        Sweep::Failed(LumenError::AllEndpointsFailed {
            attempted: endpoints.len(),
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Bounded background reconnection after an unsolicited close.
    async fn reconnect(&mut self, mut last: LumenError) -> Option<(String, Box<dyn WsLink>)> {
        loop {
            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempt();
                let err = LumenError::MaxRetriesExceeded { attempts, last: last.to_string() };
                error!("[ecm] {}: {err}", self.network.id);
                let event = NodeEvent::Error { network: self.network.id.clone(), error: err };
                self.transition(|state| state.status = ConnectionState::Error, event);
                return None;
            };
            let attempt = self.backoff.attempt();
            let network = self.network.id.clone();
            let event = NodeEvent::Reconnecting { network, attempt, delay };
            let scheduled = self.transition(
                |state| {
                    state.status = ConnectionState::Reconnecting;
                    state.reconnect_attempt = attempt;
                },
                event,
            );
            if !scheduled {
                return None;
            }
            info!("[ecm] {} reconnect attempt {attempt} in {delay:?}", self.network.id);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return None,
            }

            match self.sweep().await {
                Sweep::Open(url, link) => return Some((url, link)),
                Sweep::Failed(err) => last = err,
                Sweep::Cancelled => return None,
            }
        }
    }

    /// Own the socket until shutdown or loss: route responses to pending
    /// requests, publish everything else as stream events.
    async fn session(
        &mut self,
        url: &str,
        mut link: Box<dyn WsLink>,
        mut requests: mpsc::Receiver<Request>,
    ) -> SessionEnd {
        let mut pending = PendingRequests::default();

        let end = loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("[ecm] shutdown signal received, closing {url}");
                    break SessionEnd::Shutdown;
                }

                Some(request) = requests.recv() => {
                    let text = pending.register(request);
                    if let Err(e) = link.send(WsFrame::Text(text)).await {
                        break SessionEnd::Lost(e);
                    }
                }

                frame = link.recv() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => break SessionEnd::Lost(e),
                        None => {
                            let reason = "stream ended".to_string();
                            break SessionEnd::Lost(LumenError::UnexpectedClose(reason));
                        }
                    };
                    if let Err(e) = self.handle_frame(frame, link.as_mut(), &mut pending).await {
                        break SessionEnd::Lost(e);
                    }
                }
            }
        };

        pending.fail_all();
        link.close().await;
        end
    }

    async fn handle_frame(
        &self,
        frame: WsFrame,
        link: &mut dyn WsLink,
        pending: &mut PendingRequests,
    ) -> Result<()> {
        match frame {
            WsFrame::Text(text) => {
                let message: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("[ecm] dropping malformed frame: {e}");
                        return Ok(());
                    }
                };
                if let Some(stream) = pending.resolve(message) {
                    self.transition(|_| {}, NodeEvent::Stream(stream));
                }
                Ok(())
            }
            WsFrame::Ping(payload) => link.send(WsFrame::Pong(payload)).await,
            WsFrame::Pong(_) | WsFrame::Binary(_) => Ok(()),
            WsFrame::Close(reason) => {
                let reason = reason.unwrap_or_else(|| "close frame without reason".into());
                Err(LumenError::UnexpectedClose(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lumen_core::backoff::BackoffConfig;
    use lumen_core::ws::{MockBehavior, MockConnector};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{Instant, sleep};

    const A: &str = "wss://a.example";
    const B: &str = "wss://b.example";
    const C: &str = "wss://c.example";

    fn network(urls: &[&str]) -> NetworkConfig {
        let mut net = NetworkConfig::new("testnet", urls.iter().map(|u| u.to_string()).collect());
        net.request_timeout_ms = 5_000;
        net.backoff = BackoffConfig { base_delay_ms: 1_000, max_delay_ms: 8_000, max_attempts: 3 };
        net
    }

    fn manager() -> (ConnectionManager, MockConnector) {
        let connector = MockConnector::new();
        (ConnectionManager::new(Arc::new(connector.clone())), connector)
    }

    fn drain(rx: &mut UnboundedReceiver<NodeEvent>) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn next_matching(
        rx: &mut UnboundedReceiver<NodeEvent>,
        pred: impl Fn(&NodeEvent) -> bool,
    ) -> NodeEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    fn connecting(url: &str) -> NodeEvent {
        NodeEvent::Connecting { network: "testnet".into(), url: url.into() }
    }

    fn requested_disconnect(network: &str) -> NodeEvent {
        NodeEvent::Disconnected { network: network.into(), reason: "disconnect requested".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_in_ranked_order() {
        let (ecm, connector) = manager();
        connector.set_behavior(A, MockBehavior::Hang);
        connector.set_behavior(B, MockBehavior::Refuse("connection refused".into()));
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let started = Instant::now();
        let url = ecm.connect(&network(&[A, B, C])).await.unwrap();

        assert_eq!(url, C);
        // The hanging primary costs exactly one handshake timeout.
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(ecm.state(), ConnectionState::Connected);
        assert_eq!(ecm.pinned_url().as_deref(), Some(C));
        assert_eq!(ecm.network_id().as_deref(), Some("testnet"));
        assert_eq!(ecm.handle().unwrap().url(), C);
        let attempts = (connector.attempts(A), connector.attempts(B), connector.attempts(C));
        assert_eq!(attempts, (1, 1, 1));
        assert_eq!(connector.live_links(), 1);

        assert_eq!(
            drain(&mut rx),
            vec![
                connecting(A),
                connecting(B),
                connecting(C),
                NodeEvent::Connected { network: "testnet".into(), url: C.into() },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn all_endpoints_failing_reports_last_error() {
        let (ecm, connector) = manager();
        connector.set_behavior(A, MockBehavior::Hang);
        connector.set_behavior(B, MockBehavior::Refuse("connection refused".into()));
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let err = ecm.connect(&network(&[A, B])).await.unwrap_err();
        match &err {
            LumenError::AllEndpointsFailed { attempted, last } => {
                assert_eq!(*attempted, 2);
                assert!(last.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ecm.state(), ConnectionState::Error);
        assert!(ecm.handle().is_none());
        let reported = NodeEvent::Error { network: "testnet".into(), error: err };
        assert!(drain(&mut rx).contains(&reported));

        // A failed connect() does not retry in the background.
        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.total_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_socket() {
        let (ecm, connector) = manager();
        connector.set_behavior(A, MockBehavior::AcceptAfter(Duration::from_millis(500)));
        let net = network(&[A]);

        let (first, second) = tokio::join!(ecm.connect(&net), ecm.connect(&net));
        assert_eq!(first.unwrap(), A);
        assert_eq!(second.unwrap(), A);
        assert_eq!(connector.attempts(A), 1);
        assert_eq!(connector.peak_live_links(), 1);

        // Already connected to the same id: no new handshake.
        assert_eq!(ecm.connect(&net).await.unwrap(), A);
        assert_eq!(connector.attempts(A), 1);
    }

    #[tokio::test]
    async fn malformed_network_fails_before_io() {
        let (ecm, connector) = manager();
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        assert!(matches!(ecm.connect(&network(&[])).await, Err(LumenError::Config(_))));
        let https = network(&["https://a.example"]);
        assert!(matches!(ecm.connect(&https).await, Err(LumenError::Config(_))));
        let mut blank = network(&[A]);
        blank.id = " ".into();
        assert!(matches!(ecm.connect(&blank).await, Err(LumenError::Config(_))));

        assert_eq!(connector.total_attempts(), 0);
        assert_eq!(ecm.state(), ConnectionState::Disconnected);
        assert!(drain(&mut rx).is_empty());
    }

    /// Refuse the next two handshakes, close the live socket and collect the
    /// `(attempt, delay secs)` pairs scheduled until the manager is back.
    async fn fail_twice_then_reconnect(
        connector: &MockConnector,
        rx: &mut UnboundedReceiver<NodeEvent>,
    ) -> Vec<(u32, u64)> {
        connector.push_behavior(A, MockBehavior::Refuse("down".into()));
        connector.push_behavior(A, MockBehavior::Refuse("down".into()));
        connector.accepted().await.close();

        let mut schedule = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                NodeEvent::Reconnecting { attempt, delay, .. } => {
                    schedule.push((attempt, delay.as_secs()))
                }
                NodeEvent::Connected { .. } => return schedule,
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_resets_after_success() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let schedule = fail_twice_then_reconnect(&connector, &mut rx).await;
        assert_eq!(schedule, vec![(1, 1), (2, 2), (3, 4)]);
        assert_eq!(ecm.state(), ConnectionState::Connected);
        assert_eq!(ecm.reconnect_attempt(), 0);
        assert_eq!(connector.attempts(A), 4);
        assert!(ecm.handle().is_some());

        // Counter starts from scratch after the verified reconnect.
        let schedule = fail_twice_then_reconnect(&connector, &mut rx).await;
        assert_eq!(schedule, vec![(1, 1), (2, 2), (3, 4)]);
        assert_eq!(connector.attempts(A), 7);
        assert_eq!(connector.peak_live_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_is_announced_before_retrying() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        connector.accepted().await.close();
        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            NodeEvent::Disconnected { ref reason, .. } if reason.contains("server closing")
        ));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            NodeEvent::Reconnecting {
                network: "testnet".into(),
                attempt: 1,
                delay: Duration::from_secs(1),
            }
        );
        assert_eq!(rx.recv().await.unwrap(), connecting(A));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_end_in_error_until_connect() {
        let (ecm, connector) = manager();
        let net = network(&[A]);
        ecm.connect(&net).await.unwrap();
        let server = connector.accepted().await;
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        connector.set_behavior(A, MockBehavior::Refuse("down".into()));
        server.close();

        let event = next_matching(&mut rx, |e| matches!(e, NodeEvent::Error { .. })).await;
        match event {
            NodeEvent::Error { error: LumenError::MaxRetriesExceeded { attempts, last }, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("down"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(ecm.state(), ConnectionState::Error);
        assert!(ecm.handle().is_none());

        sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.attempts(A), 4);

        connector.set_behavior(A, MockBehavior::Accept);
        assert_eq!(ecm.connect(&net).await.unwrap(), A);
        assert_eq!(ecm.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let server = connector.accepted().await;
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        server.close();
        next_matching(&mut rx, |e| matches!(e, NodeEvent::Reconnecting { .. })).await;
        assert_eq!(ecm.state(), ConnectionState::Reconnecting);

        ecm.disconnect().await;
        assert_eq!(ecm.state(), ConnectionState::Disconnected);
        assert_eq!(ecm.reconnect_attempt(), 0);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(A), 1);
        assert_eq!(drain(&mut rx), vec![requested_disconnect("testnet")]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let (ecm, connector) = manager();
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        ecm.disconnect().await;
        assert!(drain(&mut rx).is_empty());

        ecm.connect(&network(&[A])).await.unwrap();
        let server = connector.accepted().await;
        drain(&mut rx);

        ecm.disconnect().await;
        ecm.disconnect().await;
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(connector.live_links(), 0);
        assert!(server.is_client_gone());
        assert!(ecm.pinned_url().is_none());
        assert!(ecm.network_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_supersedes_pending_connect() {
        let (ecm, connector) = manager();
        connector.set_behavior(A, MockBehavior::Hang);
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let pending = tokio::spawn({
            let ecm = ecm.clone();
            async move { ecm.connect(&network(&[A, B])).await }
        });
        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(A), 1);

        ecm.disconnect().await;
        assert_eq!(pending.await.unwrap(), Err(LumenError::Superseded));

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(B), 0);
        assert_eq!(ecm.state(), ConnectionState::Disconnected);
        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&requested_disconnect("testnet")));
        assert!(!events.iter().any(|e| matches!(e, NodeEvent::Connected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_network_keeps_one_socket() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let first = connector.accepted().await;
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let mut mainnet = network(&[B]);
        mainnet.id = "mainnet".into();
        assert_eq!(ecm.connect(&mainnet).await.unwrap(), B);

        assert!(first.is_client_gone());
        assert_eq!(connector.peak_live_links(), 1);
        assert_eq!(ecm.network_id().as_deref(), Some("mainnet"));
        assert_eq!(ecm.pinned_url().as_deref(), Some(B));

        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            NodeEvent::Disconnected { network, .. } if network == "testnet"
        ));
        assert_eq!(events[1], NodeEvent::Connecting { network: "mainnet".into(), url: B.into() });
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_pending_connect_announces_no_disconnect() {
        let (ecm, connector) = manager();
        connector.set_behavior(A, MockBehavior::Hang);
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let pending = tokio::spawn({
            let ecm = ecm.clone();
            async move { ecm.connect(&network(&[A])).await }
        });
        sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(A), 1);

        let mut mainnet = network(&[B]);
        mainnet.id = "mainnet".into();
        assert_eq!(ecm.connect(&mainnet).await.unwrap(), B);
        assert_eq!(pending.await.unwrap(), Err(LumenError::Superseded));

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, NodeEvent::Disconnected { .. })), "{events:?}");
        let connected = NodeEvent::Connected { network: "mainnet".into(), url: B.into() };
        assert_eq!(events.last(), Some(&connected));
        assert_eq!(connector.peak_live_links(), 1);
        ecm.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn handle_correlates_requests_and_publishes_stream() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let mut server = connector.accepted().await;
        let (_sub, mut rx) = ecm.events().subscribe_channel();

        let handle = ecm.handle().unwrap();
        let request =
            tokio::spawn(async move { handle.request(json!({"command": "server_info"})).await });

        let sent = match server.next_sent().await.unwrap() {
            WsFrame::Text(text) => serde_json::from_str::<Value>(&text).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        };
        assert_eq!(sent["command"], "server_info");
        let id = sent["id"].as_u64().unwrap();

        // A stream message interleaved with the response.
        server.push_text(json!({"type": "ledgerClosed", "ledger_index": 42}).to_string());
        let response = json!({
            "id": id,
            "status": "success",
            "result": {"info": {"build_version": "2.3.0"}}
        });
        server.push_text(response.to_string());

        let response = request.await.unwrap().unwrap();
        assert_eq!(response["result"]["info"]["build_version"], "2.3.0");

        let stream = next_matching(&mut rx, |e| matches!(e, NodeEvent::Stream(_))).await;
        assert_eq!(stream, NodeEvent::Stream(json!({"type": "ledgerClosed", "ledger_index": 42})));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_fails_when_connection_drops() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let mut server = connector.accepted().await;
        // Keep the manager from reconnecting during the check.
        connector.set_behavior(A, MockBehavior::Hang);

        let handle = ecm.handle().unwrap();
        let request = tokio::spawn({
            let handle = handle.clone();
            async move { handle.request(json!({"command": "account_info"})).await }
        });
        server.next_sent().await.unwrap();
        server.close();

        assert_eq!(request.await.unwrap(), Err(LumenError::NotConnected));
        assert_eq!(handle.request(json!({"command": "ping"})).await, Err(LumenError::NotConnected));
        assert!(ecm.handle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn answers_pings_and_ignores_garbage() {
        let (ecm, connector) = manager();
        ecm.connect(&network(&[A])).await.unwrap();
        let mut server = connector.accepted().await;

        server.push_text("{not json");
        server.push(WsFrame::Ping(vec![7]));
        assert_eq!(server.next_sent().await, Some(WsFrame::Pong(vec![7])));
        assert_eq!(ecm.state(), ConnectionState::Connected);
    }
}
