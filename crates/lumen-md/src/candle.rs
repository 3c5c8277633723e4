//! Candle builder: turns raw ticks and exchange bars into time-bucketed
//! OHLCV records.
//!
//! [`build_candle`] and [`merge_bar`] are pure: given the current time, the
//! incoming data and the existing bucket (if any) they return the updated
//! candle. [`CandleBook`] keeps one source's buckets, applies the pure
//! functions and purges buckets older than the retention window on every
//! update.
//!
//! Within a bucket `high`/`low` are max/min reducers, so their final value does
//! not depend on arrival order. `close` is last-write-wins by arrival.

use std::collections::BTreeMap;

use lumen_core::{Candle, PriceEvent, PriceTick, SourceId, VolumeMode, bucket_key};

/// An exchange-computed bar (e.g. Binance `kline_1m`, Bybit `kline.1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlineBar {
    /// Bar start (ms).
    pub start: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume traded inside this bar so far.
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<u64>,
}

/// Fold one tick into its bucket.
///
/// The bucket key comes from the tick's own timestamp when it has one, and
/// from `now_ms` otherwise. `existing` is only used when it covers that same
/// bucket, otherwise a fresh bucket is opened. Returns `None` for ticks
/// without a usable price.
pub fn build_candle(
    now_ms: u64,
    tick: &PriceTick,
    existing: Option<&Candle>,
    source: SourceId,
    interval_ms: u64,
    mode: VolumeMode,
) -> Option<Candle> {
    if !tick.has_price() {
        return None;
    }
    let price = tick.price?;
    let key = bucket_key(tick.timestamp.unwrap_or(now_ms), interval_ms);

    let mut candle = match existing.filter(|c| c.timestamp == key) {
        None => Candle::open_at(source, key, price, tick.volume.unwrap_or(0.0), now_ms),
        Some(prev) => {
            let mut c = *prev;
            c.high = c.high.max(price);
            c.low = c.low.min(price);
            c.close = price;
            match (mode, tick.volume) {
                (VolumeMode::Replace, Some(v)) => c.volume = v,
                (VolumeMode::Accumulate, Some(v)) => c.volume += v,
                (_, None) => {}
            }
            c.updated_at = now_ms;
            c
        }
    };

    if tick.vwap.is_some() {
        candle.vwap = tick.vwap;
    }
    if tick.trade_count.is_some() {
        candle.trade_count = tick.trade_count;
    }
    Some(candle)
}

/// Fold an exchange bar into its bucket.
///
/// The bar's volume already covers the whole bucket, so it replaces the
/// stored value whatever the source's tick semantics are.
pub fn merge_bar(
    now_ms: u64,
    bar: &KlineBar,
    existing: Option<&Candle>,
    source: SourceId,
    interval_ms: u64,
) -> Candle {
    let key = bucket_key(bar.start, interval_ms);
    let mut candle = match existing.filter(|c| c.timestamp == key) {
        None => Candle {
            timestamp: key,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            vwap: None,
            trade_count: None,
            source,
            updated_at: now_ms,
        },
        Some(prev) => {
            let mut c = *prev;
            c.high = c.high.max(bar.high);
            c.low = c.low.min(bar.low);
            c.close = bar.close;
            c.volume = bar.volume;
            c.updated_at = now_ms;
            c
        }
    };
    if bar.vwap.is_some() {
        candle.vwap = bar.vwap;
    }
    if bar.trade_count.is_some() {
        candle.trade_count = bar.trade_count;
    }
    candle
}

/// Combine the current candle with the latest ticker snapshot into the
/// emitted sample. Ticker fields win over the candle's for the same quantity:
/// its price becomes `close` (widening `high`/`low` if needed), and its
/// rolling volume replaces the bucket volume for [`VolumeMode::Replace`]
/// sources.
pub fn overlay(candle: &Candle, ticker: &PriceTick, mode: VolumeMode) -> PriceEvent {
    let mut c = *candle;
    if let Some(price) = ticker.price.filter(|p| p.is_finite() && *p > 0.0) {
        c.close = price;
        c.high = c.high.max(price);
        c.low = c.low.min(price);
    }
    if let (VolumeMode::Replace, Some(v)) = (mode, ticker.volume) {
        c.volume = v;
    }
    if ticker.vwap.is_some() {
        c.vwap = ticker.vwap;
    }
    PriceEvent { source: c.source, candle: c, bid: ticker.bid, ask: ticker.ask }
}

/// Per-source bucket store with retention-based eviction.
#[derive(Debug, Clone)]
pub struct CandleBook {
    source: SourceId,
    interval_ms: u64,
    retention_ms: u64,
    mode: VolumeMode,
    buckets: BTreeMap<u64, Candle>,
}

impl CandleBook {
    pub fn new(source: SourceId, interval_ms: u64, retention_ms: u64, mode: VolumeMode) -> Self {
        Self { source, interval_ms, retention_ms, mode, buckets: BTreeMap::new() }
    }

    /// Apply a tick. Returns the updated candle, or `None` if the tick had no
    /// usable price or fell outside the retention window.
    pub fn apply_tick(&mut self, now_ms: u64, tick: &PriceTick) -> Option<Candle> {
        let key = bucket_key(tick.timestamp.unwrap_or(now_ms), self.interval_ms);
        if self.is_expired(now_ms, key) {
            return None;
        }
        let existing = self.buckets.get(&key);
        let updated =
            build_candle(now_ms, tick, existing, self.source, self.interval_ms, self.mode)?;
        self.buckets.insert(updated.timestamp, updated);
        self.purge(now_ms);
        Some(updated)
    }

    /// Apply an exchange bar. Returns the updated candle unless the bar is
    /// older than the retention window.
    pub fn apply_bar(&mut self, now_ms: u64, bar: &KlineBar) -> Option<Candle> {
        let key = bucket_key(bar.start, self.interval_ms);
        if self.is_expired(now_ms, key) {
            return None;
        }
        let updated = merge_bar(now_ms, bar, self.buckets.get(&key), self.source, self.interval_ms);
        self.buckets.insert(updated.timestamp, updated);
        self.purge(now_ms);
        Some(updated)
    }

    /// Drop buckets that started before `now - retention`.
    pub fn purge(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        self.buckets = self.buckets.split_off(&cutoff);
    }

    /// The newest bucket.
    pub fn current(&self) -> Option<&Candle> {
        self.buckets.values().next_back()
    }

    pub fn get(&self, bucket: u64) -> Option<&Candle> {
        self.buckets.get(&bucket)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn volume_mode(&self) -> VolumeMode {
        self.mode
    }

    fn is_expired(&self, now_ms: u64, key: u64) -> bool {
        key < now_ms.saturating_sub(self.retention_ms)
    }
}
