//! Market data structures, the values flowing from feed adapters to the
//! aggregator.
//!
//! # Timestamp convention
//!
//! All timestamps are **milliseconds since Unix epoch**. Exchanges that report
//! seconds or microseconds are converted at the parser boundary.

use serde::{Deserialize, Serialize};

use super::enums::SourceId;

// ---------------------------------------------------------------------------
// PriceTick
// ---------------------------------------------------------------------------

/// Partial price snapshot. Sources disclose different subsets, so every field
/// is optional.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub vwap: Option<f64>,
    pub trade_count: Option<u64>,
    pub timestamp: Option<u64>,
    pub source: Option<SourceId>,
}

impl PriceTick {
    /// Overlay `newer` onto `self`: every field `newer` discloses wins.
    pub fn merge(&mut self, newer: &PriceTick) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if newer.$field.is_some() { self.$field = newer.$field; })*
            };
        }
        take!(price, bid, ask, volume, high, low, vwap, trade_count, timestamp, source);
    }

    /// A tick is usable for candle building only with a finite, positive price.
    pub fn has_price(&self) -> bool {
        self.price.is_some_and(|p| p.is_finite() && p > 0.0)
    }
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// OHLCV aggregate for one fixed time bucket of one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start (ms).
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub trade_count: Option<u64>,
    pub source: SourceId,
    /// Wall-clock time of the last mutation (ms).
    pub updated_at: u64,
}

impl Candle {
    /// Start a fresh bucket at a single price.
    pub fn open_at(source: SourceId, bucket: u64, price: f64, volume: f64, now_ms: u64) -> Self {
        Self {
            timestamp: bucket,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            vwap: None,
            trade_count: None,
            source,
            updated_at: now_ms,
        }
    }
}

impl std::fmt::Display for Candle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Candle({} t={} o={:.6} h={:.6} l={:.6} c={:.6} v={:.4})",
            self.source, self.timestamp, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

/// Start of the bucket containing `ts`: `floor(ts / interval) * interval`.
///
/// A zero interval degenerates to the timestamp itself.
#[inline]
pub fn bucket_key(ts: u64, interval_ms: u64) -> u64 {
    if interval_ms == 0 {
        return ts;
    }
    ts - ts % interval_ms
}

// ---------------------------------------------------------------------------
// Emitted price samples
// ---------------------------------------------------------------------------

/// A normalized sample emitted by a feed adapter: the current candle of the
/// source overlaid with its most recent ticker snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub source: SourceId,
    pub candle: Candle,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl PriceEvent {
    /// The most recent traded price for the source.
    pub fn last_price(&self) -> f64 {
        self.candle.close
    }
}

/// One point of the cross-source combined view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSample {
    /// One-second bucket start (ms).
    pub timestamp: u64,
    /// Volume-weighted average price across the reporting sources.
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub sources: Vec<SourceId>,
}
