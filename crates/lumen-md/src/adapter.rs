//! Generic exchange feed adapter.
//!
//! A [`FeedAdapter`] runs one [`FeedDef`] as a background tokio task that:
//! 1. Connects to the exchange WebSocket endpoint (with a handshake timeout).
//! 2. Sends the subscription messages.
//! 3. Reads frames, parses them and folds them into the source's candles.
//! 4. Sends periodic pings and answers server pings.
//! 5. Emits throttled [`FeedEvent::Price`] samples.
//! 6. Treats a silent socket as dead and reconnects with exponential backoff.
//!
//! Every task carries a generation number. `disconnect()` bumps the
//! generation before stopping the task, so anything the old task still tries
//! to publish on its way out is dropped. A task started while an older one is
//! still shutting down waits for it to finish before opening its own socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use lumen_core::backoff::Backoff;
use lumen_core::events::EventBus;
use lumen_core::time_util;
use lumen_core::ws::{WsConnector, WsFrame, WsLink};
use lumen_core::{ConnectionState, LumenError, PriceEvent, PriceTick, Result, SourceId, VolumeMode};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::PriceFeed;
use crate::candle::{CandleBook, overlay};
use crate::pipeline::{FeedDef, FeedFrame, FeedSettings};

/// Lifecycle and data events published by one adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected { source: SourceId, url: String },
    Disconnected { source: SourceId, reason: String },
    Price(PriceEvent),
    Error { source: SourceId, error: LumenError },
}

// ---------------------------------------------------------------------------
// Emission throttle
// ---------------------------------------------------------------------------

/// Leading + trailing edge rate limiter.
///
/// The first update after a quiet window goes out immediately. Updates inside
/// the window only mark the state dirty, and the latest state is flushed once
/// the window closes.
#[derive(Debug, Clone)]
pub struct EmitThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
    dirty: bool,
}

impl EmitThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_emit: None, dirty: false }
    }

    /// Record an update. Returns `true` if it should be emitted right now.
    pub fn on_update(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now < last + self.min_interval => {
                self.dirty = true;
                false
            }
            _ => {
                self.mark_emitted(now);
                true
            }
        }
    }

    /// When the pending trailing emission is due, if there is one.
    pub fn flush_deadline(&self) -> Option<Instant> {
        if !self.dirty {
            return None;
        }
        Some(self.last_emit.map_or_else(Instant::now, |last| last + self.min_interval))
    }

    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_emit = Some(now);
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// ---------------------------------------------------------------------------
// Per-source market state
// ---------------------------------------------------------------------------

/// Candles plus the latest ticker snapshot of one source. Lives as long as the
/// adapter task, so it survives reconnects but not `disconnect()`.
struct SourceState {
    book: CandleBook,
    ticker: PriceTick,
    throttle: EmitThrottle,
}

impl SourceState {
    fn new(def: &FeedDef, settings: &FeedSettings) -> Self {
        Self {
            book: CandleBook::new(
                def.source,
                settings.candle_interval_ms,
                settings.candle_retention_ms,
                def.volume_mode,
            ),
            ticker: PriceTick { source: Some(def.source), ..Default::default() },
            throttle: EmitThrottle::new(settings.min_emit_interval),
        }
    }

    /// Fold a data frame in. Returns `true` if the source state changed.
    ///
    /// Volume only reaches the candle from the frame kind that matches the
    /// source's semantics: ticker volume for rolling-total sources, trade
    /// volume for accumulating ones.
    fn apply(&mut self, now_ms: u64, frame: &FeedFrame) -> bool {
        let mode = self.book.volume_mode();
        match frame {
            FeedFrame::Ticker(tick) => {
                self.ticker.merge(tick);
                let mut t = *tick;
                if mode == VolumeMode::Accumulate {
                    t.volume = None;
                }
                self.book.apply_tick(now_ms, &t);
                true
            }
            FeedFrame::Trade(tick) => {
                if tick.price.is_some() {
                    self.ticker.price = tick.price;
                }
                let mut t = *tick;
                if mode == VolumeMode::Replace {
                    t.volume = None;
                }
                self.book.apply_tick(now_ms, &t).is_some()
            }
            FeedFrame::Kline(bar) => self.book.apply_bar(now_ms, bar).is_some(),
            FeedFrame::Heartbeat | FeedFrame::Ack | FeedFrame::Rejected(_) => false,
        }
    }

    fn snapshot(&self) -> Option<PriceEvent> {
        self.book.current().map(|c| overlay(c, &self.ticker, self.book.volume_mode()))
    }
}

// ---------------------------------------------------------------------------
// FeedAdapter
// ---------------------------------------------------------------------------

/// Completion of a task that `stop()` is waiting on.
type Stopping = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Control {
    task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
    stopping: Option<Stopping>,
}

/// One exchange feed driven by a [`FeedDef`].
pub struct FeedAdapter {
    def: Arc<FeedDef>,
    settings: FeedSettings,
    connector: Arc<dyn WsConnector>,
    events: EventBus<FeedEvent>,
    generation: Arc<AtomicU64>,
    state: Arc<Mutex<ConnectionState>>,
    control: Mutex<Control>,
}

impl FeedAdapter {
    pub fn new(def: FeedDef, settings: FeedSettings, connector: Arc<dyn WsConnector>) -> Self {
        Self {
            def: Arc::new(def),
            settings,
            connector,
            events: EventBus::new(),
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn def(&self) -> &FeedDef {
        &self.def
    }

    /// Start the feed task. A no-op while a task is already running.
    pub fn start(&self) {
        let mut control = self.control.lock();
        if control.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("[{}] already running", self.def.label);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = FeedTask {
            def: Arc::clone(&self.def),
            settings: self.settings,
            connector: Arc::clone(&self.connector),
            events: self.events.clone(),
            current: Arc::clone(&self.generation),
            state: Arc::clone(&self.state),
            generation,
            shutdown: shutdown_rx,
            previous: control.stopping.take(),
        };
        control.shutdown = Some(shutdown_tx);
        control.task = Some(tokio::spawn(task.run()));
    }

    /// Stop the feed task and wait for it to finish. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (generation, stopping) = {
            let mut control = self.control.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(tx) = control.shutdown.take() {
                let _ = tx.send(true);
            }
            if let Some(task) = control.task.take() {
                let label = self.def.label.clone();
                let done = async move {
                    if let Err(e) = task.await {
                        warn!("[{label}] feed task ended abnormally: {e}");
                    }
                    info!("[{label}] stopped");
                };
                control.stopping = Some(done.boxed().shared());
            }
            (generation, control.stopping.clone())
        };
        if let Some(done) = stopping {
            done.await;
        }

        // A start() that raced this call owns the state now.
        let mut control = self.control.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            control.stopping = None;
            *self.state.lock() = ConnectionState::Disconnected;
        }
    }
}

#[async_trait]
impl PriceFeed for FeedAdapter {
    fn source(&self) -> SourceId {
        self.def.source
    }

    fn connect(&self) {
        self.start();
    }

    async fn disconnect(&self) {
        self.stop().await;
    }

    fn events(&self) -> &EventBus<FeedEvent> {
        &self.events
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

impl Drop for FeedAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Feed task
// ---------------------------------------------------------------------------

struct FeedTask {
    def: Arc<FeedDef>,
    settings: FeedSettings,
    connector: Arc<dyn WsConnector>,
    events: EventBus<FeedEvent>,
    current: Arc<AtomicU64>,
    state: Arc<Mutex<ConnectionState>>,
    generation: u64,
    shutdown: watch::Receiver<bool>,
    /// The task this one replaces, possibly still closing its socket.
    previous: Option<Stopping>,
}

impl FeedTask {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn emit(&self, event: FeedEvent) {
        if self.is_current() {
            self.events.emit(&event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if self.is_current() {
            *self.state.lock() = state;
        }
    }

    /// Connect, read, reconnect. Returns on shutdown or once the retry budget
    /// is spent.
    async fn run(mut self) {
        let label = self.def.label.clone();
        let mut backoff = Backoff::new(self.settings.backoff);
        let mut source = SourceState::new(&self.def, &self.settings);

        if let Some(previous) = self.previous.take() {
            previous.await;
        }

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let last_error = match self.session(&mut backoff, &mut source).await {
                Ok(()) => return,
                Err(e) => e,
            };

            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempt();
                error!("[{label}] giving up after {attempts} reconnect attempts: {last_error}");
                self.set_state(ConnectionState::Error);
                self.emit(FeedEvent::Error {
                    source: self.def.source,
                    error: LumenError::MaxRetriesExceeded {
                        attempts,
                        last: last_error.to_string(),
                    },
                });
                return;
            };

            warn!("[{label}] reconnecting in {delay:?} (attempt {})", backoff.attempt());
            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }

    /// One socket lifetime. `Ok(())` means shutdown was requested, `Err` that
    /// the connection failed or was lost and should be retried.
    async fn session(&mut self, backoff: &mut Backoff, source: &mut SourceState) -> Result<()> {
        let label = self.def.label.clone();
        let url = self.def.ws_url.clone();
        let timeout = self.settings.connect_timeout;

        info!("[{label}] connecting to {url}");
        self.set_state(ConnectionState::Connecting);

        let connect = tokio::time::timeout(timeout, self.connector.connect(&url));
        let result = tokio::select! {
            res = connect => res,
            _ = self.shutdown.changed() => return Ok(()),
        };
        let mut link = match result {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(self.connect_failed(e)),
            Err(_) => {
                return Err(self.connect_failed(LumenError::ConnectionTimeout { url, timeout }));
            }
        };

        for msg in &self.def.subscribe_msgs {
            debug!("[{label}] subscribing: {msg}");
            if let Err(e) = link.send(WsFrame::Text(msg.clone())).await {
                link.close().await;
                return Err(self.connect_failed(e));
            }
        }

        info!("[{label}] connected");
        self.set_state(ConnectionState::Connected);
        self.emit(FeedEvent::Connected { source: self.def.source, url: url.clone() });

        let reason = self.read_loop(&mut link, backoff, source).await;
        link.close().await;

        match reason {
            None => Ok(()),
            Some(e) => {
                warn!("[{label}] disconnected: {e}");
                self.set_state(ConnectionState::Disconnected);
                let reason = e.to_string();
                self.emit(FeedEvent::Disconnected { source: self.def.source, reason });
                Err(e)
            }
        }
    }

    fn connect_failed(&self, e: LumenError) -> LumenError {
        error!("[{}] connection failed: {e}", self.def.label);
        self.emit(FeedEvent::Error { source: self.def.source, error: e.clone() });
        e
    }

    /// Main read/write loop. Returns `None` on shutdown, or why the socket is
    /// considered lost.
    async fn read_loop(
        &mut self,
        link: &mut Box<dyn WsLink>,
        backoff: &mut Backoff,
        source: &mut SourceState,
    ) -> Option<LumenError> {
        let data_timeout = self.settings.data_timeout;
        let mut last_frame = Instant::now();
        let mut verified = false;
        let mut ping = self.def.ping.as_ref().map(|p| {
            let mut iv = tokio::time::interval_at(Instant::now() + p.interval, p.interval);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });

        loop {
            let idle_deadline = last_frame + data_timeout;
            let flush_at = source.throttle.flush_deadline();

            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("[{}] shutdown signal received", self.def.label);
                    return None;
                }

                frame = link.recv() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Some(e),
                        None => return Some(LumenError::UnexpectedClose("stream ended".into())),
                    };
                    last_frame = Instant::now();
                    // The first frame after subscribing proves the connection works.
                    if !verified {
                        verified = true;
                        backoff.reset();
                    }
                    if let Err(e) = self.handle_frame(frame, link, source).await {
                        return Some(e);
                    }
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    let label = &self.def.label;
                    warn!("[{label}] no data for {data_timeout:?}, treating socket as dead");
                    let reason = format!("no data for {data_timeout:?}");
                    return Some(LumenError::UnexpectedClose(reason));
                }

                _ = next_tick(&mut ping) => {
                    if let Some(p) = &self.def.ping {
                        if let Err(e) = link.send(p.payload.to_frame()).await {
                            return Some(e);
                        }
                    }
                }

                _ = sleep_until_opt(flush_at) => {
                    source.throttle.mark_emitted(Instant::now());
                    if let Some(sample) = source.snapshot() {
                        self.emit(FeedEvent::Price(sample));
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        frame: WsFrame,
        link: &mut Box<dyn WsLink>,
        source: &mut SourceState,
    ) -> Result<()> {
        let label = &self.def.label;
        let text = match frame {
            WsFrame::Text(text) => text,
            WsFrame::Ping(data) => return link.send(WsFrame::Pong(data)).await,
            WsFrame::Pong(_) => return Ok(()),
            WsFrame::Binary(data) => {
                debug!("[{label}] ignoring {} byte binary frame", data.len());
                return Ok(());
            }
            WsFrame::Close(reason) => {
                let reason = reason.unwrap_or_else(|| "close frame".into());
                return Err(LumenError::UnexpectedClose(reason));
            }
        };

        let frames = match self.def.parse(&text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("[{label}] dropping frame: {e}");
                return Ok(());
            }
        };

        let now_ms = time_util::now_ms();
        let mut changed = false;
        for frame in &frames {
            match frame {
                FeedFrame::Ack => debug!("[{label}] subscription acknowledged"),
                FeedFrame::Rejected(msg) => {
                    warn!("[{label}] subscription rejected: {msg}");
                    self.emit(FeedEvent::Error {
                        source: self.def.source,
                        error: LumenError::Subscription(msg.clone()),
                    });
                }
                _ => changed |= source.apply(now_ms, frame),
            }
        }

        if changed && source.throttle.on_update(Instant::now()) {
            if let Some(sample) = source.snapshot() {
                self.emit(FeedEvent::Price(sample));
            }
        }
        Ok(())
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
