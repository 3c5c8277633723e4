//! Feed aggregator: fans in every adapter's price events, keeps a bounded,
//! deduplicated history per source and derives the cross-source combined
//! view.
//!
//! The aggregator exclusively owns all [`FeedHistory`] values. Adapters are
//! producers only and never read history back.
//!
//! # Combined view
//!
//! Samples are grouped into one-second buckets by the candle's `updated_at`.
//! Within a bucket each source contributes its most recent candle:
//!
//! ```text
//! price  = Σ(close_i * volume_i) / Σ(volume_i)
//! high   = max(high_i)      low = min(low_i)
//! ```
//!
//! A bucket where no source reports volume produces no sample.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use lumen_core::config::AggregatorConfig;
use lumen_core::events::{EventBus, Subscription};
use lumen_core::{AggregatedSample, Candle, PriceEvent, SourceId, bucket_key};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::PriceFeed;
use crate::adapter::FeedEvent;

/// Width of a combined-view bucket.
pub const COMBINE_BUCKET_MS: u64 = 1_000;

/// Events published by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEvent {
    /// A per-source sample that changed the source's last price.
    Price(PriceEvent),
    /// The combined sample for the bucket the latest price fell into.
    Update(AggregatedSample),
    /// Warm-up elapsed after `connect()`.
    Ready,
}

// ---------------------------------------------------------------------------
// FeedHistory
// ---------------------------------------------------------------------------

/// Rolling per-source candle history, capped with FIFO eviction.
#[derive(Debug, Clone)]
pub struct FeedHistory {
    entries: VecDeque<Candle>,
    max_len: usize,
}

impl FeedHistory {
    pub fn new(max_len: usize) -> Self {
        Self { entries: VecDeque::with_capacity(max_len.min(1024)), max_len: max_len.max(1) }
    }

    /// Append unless the last price equals the previous entry's. Returns
    /// whether the candle was stored.
    pub fn push_if_changed(&mut self, candle: Candle) -> bool {
        if self.entries.back().is_some_and(|last| last.close == candle.close) {
            return false;
        }
        self.entries.push_back(candle);
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
        true
    }

    pub fn last(&self) -> Option<&Candle> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge one bucket's per-source candles. `None` when nobody reported volume.
pub fn combine(bucket: u64, candles: &[Candle]) -> Option<AggregatedSample> {
    let weighted: Vec<&Candle> = candles
        .iter()
        .filter(|c| c.volume.is_finite() && c.volume > 0.0 && c.close.is_finite())
        .collect();
    let total: f64 = weighted.iter().map(|c| c.volume).sum();
    if weighted.is_empty() || total <= 0.0 {
        return None;
    }
    let price = weighted.iter().map(|c| c.close * c.volume).sum::<f64>() / total;

    let mut sources: Vec<SourceId> = candles.iter().map(|c| c.source).collect();
    sources.sort();
    sources.dedup();

    Some(AggregatedSample {
        timestamp: bucket,
        price,
        high: candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
        low: candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
        volume: total,
        sources,
    })
}

// ---------------------------------------------------------------------------
// FeedAggregator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AggState {
    histories: BTreeMap<SourceId, FeedHistory>,
    latest: AHashMap<SourceId, PriceEvent>,
}

impl AggState {
    fn combined_at(&self, bucket: u64) -> Option<AggregatedSample> {
        let candles: Vec<Candle> = self
            .latest
            .values()
            .map(|ev| ev.candle)
            .filter(|c| bucket_key(c.updated_at, COMBINE_BUCKET_MS) == bucket)
            .collect();
        combine(bucket, &candles)
    }
}

#[derive(Default)]
struct Control {
    running: bool,
    generation: u64,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

struct AggInner {
    feeds: Vec<Arc<dyn PriceFeed>>,
    config: AggregatorConfig,
    state: Mutex<AggState>,
    events: EventBus<AggregatorEvent>,
    ready: AtomicBool,
    control: Mutex<Control>,
}

impl AggInner {
    fn ingest(&self, ev: &PriceEvent) {
        let update = {
            let mut state = self.state.lock();
            state.latest.insert(ev.source, *ev);
            let max = self.config.max_history;
            let history = state.histories.entry(ev.source).or_insert_with(|| FeedHistory::new(max));
            if !history.push_if_changed(ev.candle) {
                return;
            }
            state.combined_at(bucket_key(ev.candle.updated_at, COMBINE_BUCKET_MS))
        };

        self.events.emit(&AggregatorEvent::Price(*ev));
        if let Some(sample) = update {
            self.events.emit(&AggregatorEvent::Update(sample));
        }
    }

    fn on_feed_event(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Price(ev) => self.ingest(ev),
            FeedEvent::Connected { source, url } => {
                info!("[aggregator] {source} connected to {url}")
            }
            FeedEvent::Disconnected { source, reason } => {
                warn!("[aggregator] {source} disconnected: {reason}")
            }
            FeedEvent::Error { source, error } => warn!("[aggregator] {source} error: {error}"),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let control = self.control.lock();
        control.running && control.generation == generation
    }
}

/// Multi-source price aggregator.
#[derive(Clone)]
pub struct FeedAggregator {
    inner: Arc<AggInner>,
}

impl FeedAggregator {
    pub fn new(feeds: Vec<Arc<dyn PriceFeed>>, config: AggregatorConfig) -> Self {
        Self {
            inner: Arc::new(AggInner {
                feeds,
                config,
                state: Mutex::new(AggState::default()),
                events: EventBus::new(),
                ready: AtomicBool::new(false),
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Subscribe to every adapter and start them with staggered offsets
    /// (`i * stagger_ms`). Ready is reported after `warmup_ms` whether or not
    /// every adapter is live yet. A no-op while already connected.
    pub fn connect(&self) {
        let inner = &self.inner;
        let mut control = inner.control.lock();
        if control.running {
            debug!("[aggregator] already connected");
            return;
        }
        control.running = true;
        control.generation += 1;
        let generation = control.generation;

        for (i, feed) in inner.feeds.iter().enumerate() {
            let weak: Weak<AggInner> = Arc::downgrade(inner);
            control.subscriptions.push(feed.events().subscribe(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_feed_event(event);
                }
            }));

            let delay = Duration::from_millis(inner.config.stagger_ms.saturating_mul(i as u64));
            let feed = Arc::clone(feed);
            control.tasks.push(tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                debug!("[aggregator] starting {} after {delay:?}", feed.source());
                feed.connect();
            }));
        }

        let weak = Arc::downgrade(inner);
        let warmup = Duration::from_millis(inner.config.warmup_ms);
        control.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(warmup).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.is_current(generation) {
                inner.ready.store(true, Ordering::SeqCst);
                info!("[aggregator] ready");
                inner.events.emit(&AggregatorEvent::Ready);
            }
        }));

        info!("[aggregator] connecting {} feeds", inner.feeds.len());
    }

    /// Stop every adapter and clear all history. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let (subscriptions, tasks) = {
            let mut control = self.inner.control.lock();
            control.running = false;
            control.generation += 1;
            (std::mem::take(&mut control.subscriptions), std::mem::take(&mut control.tasks))
        };
        // A start task must be gone before its feed is stopped, or it could
        // reopen the feed afterwards.
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        for sub in subscriptions {
            sub.cancel();
        }
        for feed in &self.inner.feeds {
            feed.disconnect().await;
        }

        let mut state = self.inner.state.lock();
        state.histories.clear();
        state.latest.clear();
        drop(state);
        self.inner.ready.store(false, Ordering::SeqCst);
        info!("[aggregator] disconnected");
    }

    pub fn events(&self) -> &EventBus<AggregatorEvent> {
        &self.inner.events
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn feeds(&self) -> &[Arc<dyn PriceFeed>] {
        &self.inner.feeds
    }

    /// Sources with at least one stored sample.
    pub fn sources(&self) -> Vec<SourceId> {
        self.inner.state.lock().histories.keys().copied().collect()
    }

    /// Stored history of one source, oldest first.
    pub fn history(&self, source: SourceId) -> Vec<Candle> {
        let state = self.inner.state.lock();
        state.histories.get(&source).map(|h| h.iter().copied().collect()).unwrap_or_default()
    }

    /// Most recent sample of one source, deduplicated or not.
    pub fn latest(&self, source: SourceId) -> Option<PriceEvent> {
        self.inner.state.lock().latest.get(&source).copied()
    }

    /// The full combined series over every stored history, oldest first.
    pub fn combined(&self) -> Vec<AggregatedSample> {
        let state = self.inner.state.lock();
        let mut buckets: BTreeMap<u64, BTreeMap<SourceId, Candle>> = BTreeMap::new();
        for (source, history) in &state.histories {
            for candle in history.iter() {
                // Later entries overwrite earlier ones: latest per source per bucket.
                let key = bucket_key(candle.updated_at, COMBINE_BUCKET_MS);
                buckets.entry(key).or_default().insert(*source, *candle);
            }
        }
        drop(state);

        buckets
            .into_iter()
            .filter_map(|(bucket, per_source)| {
                let candles: Vec<Candle> = per_source.into_values().collect();
                combine(bucket, &candles)
            })
            .collect()
    }

    /// Feed one sample in directly, as if an adapter had emitted it.
    pub fn ingest(&self, ev: &PriceEvent) {
        self.inner.ingest(ev);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use lumen_core::ConnectionState;
    use tokio::time::Instant;

    use super::*;

    struct FakeFeed {
        source: SourceId,
        events: EventBus<FeedEvent>,
        connected_at: Mutex<Vec<Instant>>,
        disconnects: AtomicUsize,
    }

    impl FakeFeed {
        fn new(source: SourceId) -> Arc<Self> {
            Arc::new(Self {
                source,
                events: EventBus::new(),
                connected_at: Mutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            })
        }

        fn push(&self, close: f64, volume: f64, updated_at: u64) {
            self.events.emit(&FeedEvent::Price(sample(self.source, close, volume, updated_at)));
        }
    }

    #[async_trait]
    impl PriceFeed for FakeFeed {
        fn source(&self) -> SourceId {
            self.source
        }
        fn connect(&self) {
            self.connected_at.lock().push(Instant::now());
        }
        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        fn events(&self) -> &EventBus<FeedEvent> {
            &self.events
        }
        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    const T0: u64 = 1_700_000_040_000;

    fn sample(source: SourceId, close: f64, volume: f64, updated_at: u64) -> PriceEvent {
        let mut candle = Candle::open_at(source, T0, close, volume, updated_at);
        candle.high = close + 0.01;
        candle.low = close - 0.01;
        PriceEvent { source, candle, bid: None, ask: None }
    }

    fn config(max_history: usize) -> AggregatorConfig {
        AggregatorConfig { max_history, stagger_ms: 1_000, warmup_ms: 3_000 }
    }

    fn setup() -> (FeedAggregator, Vec<Arc<FakeFeed>>) {
        let fakes: Vec<Arc<FakeFeed>> = SourceId::ALL.iter().map(|s| FakeFeed::new(*s)).collect();
        let feeds: Vec<Arc<dyn PriceFeed>> =
            fakes.iter().map(|f| Arc::clone(f) as Arc<dyn PriceFeed>).collect();
        (FeedAggregator::new(feeds, config(500)), fakes)
    }

    #[test]
    fn identical_consecutive_prices_are_deduplicated() {
        let mut h = FeedHistory::new(10);
        let a = sample(SourceId::Okx, 0.5, 1.0, T0).candle;
        assert!(h.push_if_changed(a));
        assert!(!h.push_if_changed(a));
        assert_eq!(h.len(), 1);
        assert!(h.push_if_changed(sample(SourceId::Okx, 0.51, 1.0, T0).candle));
        assert!(h.push_if_changed(a), "only consecutive duplicates are dropped");
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn history_is_capped_fifo() {
        let mut h = FeedHistory::new(3);
        for i in 0..10 {
            h.push_if_changed(sample(SourceId::Bybit, 1.0 + i as f64, 1.0, T0 + i).candle);
            assert!(h.len() <= 3);
        }
        let closes: Vec<f64> = h.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![8.0, 9.0, 10.0]);
    }

    #[test]
    fn combine_weights_by_volume() {
        let a = sample(SourceId::Binance, 1.0, 3.0, T0).candle;
        let b = sample(SourceId::Okx, 2.0, 1.0, T0 + 500).candle;
        let s = combine(T0, &[a, b]).unwrap();
        assert!((s.price - 1.25).abs() < 1e-12);
        assert_eq!(s.high, 2.01);
        assert_eq!(s.low, 0.99);
        assert_eq!(s.volume, 4.0);
        assert_eq!(s.sources, vec![SourceId::Binance, SourceId::Okx]);
    }

    #[test]
    fn combine_without_volume_yields_nothing() {
        assert!(combine(T0, &[]).is_none());
        let a = sample(SourceId::Binance, 1.0, 0.0, T0).candle;
        let b = sample(SourceId::Okx, 2.0, 0.0, T0).candle;
        assert!(combine(T0, &[a, b]).is_none());
    }

    #[test]
    fn combined_series_uses_latest_per_source_per_second() {
        let (agg, _) = setup();
        agg.ingest(&sample(SourceId::Binance, 1.0, 10.0, T0 + 100));
        agg.ingest(&sample(SourceId::Binance, 1.1, 10.0, T0 + 900));
        agg.ingest(&sample(SourceId::Okx, 1.3, 10.0, T0 + 400));
        // Next second: only OKX, no volume.
        agg.ingest(&sample(SourceId::Okx, 1.4, 0.0, T0 + 1_200));
        // Third second: Bybit alone.
        agg.ingest(&sample(SourceId::Bybit, 1.5, 2.0, T0 + 2_000));

        let series = agg.combined();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp, T0);
        assert!((series[0].price - 1.2).abs() < 1e-12);
        assert_eq!(series[1].timestamp, T0 + 2_000);
        assert_eq!(series[1].sources, vec![SourceId::Bybit]);
    }

    #[test]
    fn ingest_emits_price_and_update() {
        let (agg, _) = setup();
        let (_sub, mut rx) = agg.events().subscribe_channel();
        agg.ingest(&sample(SourceId::Binance, 1.0, 1.0, T0));
        agg.ingest(&sample(SourceId::Binance, 1.0, 1.0, T0 + 10));
        agg.ingest(&sample(SourceId::Okx, 3.0, 1.0, T0 + 20));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 4, "duplicate price produces no events: {events:?}");
        match &events[3] {
            AggregatorEvent::Update(s) => {
                assert!((s.price - 2.0).abs() < 1e-12);
                assert_eq!(s.sources.len(), 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(agg.history(SourceId::Binance).len(), 1);
        assert_eq!(agg.latest(SourceId::Binance).unwrap().candle.updated_at, T0 + 10);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_staggers_starts_and_warms_up() {
        let (agg, fakes) = setup();
        let (_sub, mut rx) = agg.events().subscribe_channel();
        let t0 = Instant::now();
        agg.connect();
        agg.connect();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        for (i, fake) in fakes.iter().enumerate() {
            let starts = fake.connected_at.lock().clone();
            assert_eq!(starts.len(), 1, "{} started once", fake.source);
            let offset = starts[0] - t0;
            let expected = Duration::from_secs(i as u64);
            let window = expected + Duration::from_millis(10);
            assert!(offset >= expected && offset < window, "{offset:?}");
        }
        assert!(!agg.is_ready());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(agg.is_ready());
        assert_eq!(rx.try_recv(), Ok(AggregatorEvent::Ready));
        agg.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn feed_events_flow_until_disconnect() {
        let (agg, fakes) = setup();
        agg.connect();
        fakes[0].push(0.5, 1.0, T0);
        fakes[2].push(0.6, 1.0, T0);
        assert_eq!(agg.sources(), vec![SourceId::Binance, SourceId::Bybit]);

        agg.disconnect().await;
        assert!(agg.sources().is_empty());
        assert!(agg.combined().is_empty());
        assert!(!agg.is_ready());
        assert!(fakes.iter().all(|f| f.disconnects.load(Ordering::SeqCst) == 1));
        assert!(fakes.iter().all(|f| f.events.listener_count() == 0));

        fakes[0].push(0.7, 1.0, T0 + 1);
        assert!(agg.history(SourceId::Binance).is_empty());

        // Warm-up from the old connect never fires.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!agg.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_stagger_cancels_pending_starts() {
        let (agg, fakes) = setup();
        agg.connect();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        agg.disconnect().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        let starts: Vec<usize> = fakes.iter().map(|f| f.connected_at.lock().len()).collect();
        assert_eq!(starts, vec![1, 1, 0]);
        assert!(fakes.iter().all(|f| f.disconnects.load(Ordering::SeqCst) == 1));
        assert!(!agg.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn dark_source_does_not_block_others() {
        let (agg, fakes) = setup();
        agg.connect();
        fakes[0].push(0.5, 1.0, T0);
        // Binance goes silent; OKX keeps reporting.
        for i in 1..5u64 {
            fakes[1].push(0.5 + i as f64 * 0.01, 1.0, T0 + i * 1_000);
        }
        let series = agg.combined();
        assert_eq!(series.len(), 5);
        assert_eq!(series[4].sources, vec![SourceId::Okx]);
        agg.disconnect().await;
    }
}
