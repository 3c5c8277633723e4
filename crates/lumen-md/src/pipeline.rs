//! Data-driven feed definitions.
//!
//! Each exchange module provides a `build(&FeedConfig) -> Result<FeedDef>`
//! function describing its socket: URL, subscription messages, keep-alive and
//! a frame parser. The generic [`FeedAdapter`](crate::adapter::FeedAdapter)
//! engine owns everything else (connection, idle supervision, backoff, candle
//! building and emission throttling).
//!
//! ```text
//! FeedConfig ──► exchange::build() ──► FeedDef ──► FeedAdapter ──► FeedEvent
//! ```

use std::time::Duration;

use lumen_core::backoff::BackoffPolicy;
use lumen_core::config::FeedSettingsConfig;
use lumen_core::ws::PingPayload;
use lumen_core::{PriceTick, Result, SourceId, VolumeMode};

use crate::candle::KlineBar;

/// One decoded unit of a text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// Ticker snapshot. Volume, when present, is the source's rolling figure.
    Ticker(PriceTick),
    /// Individual trade. Volume, when present, is the traded quantity.
    Trade(PriceTick),
    /// Exchange-computed bar for the current bucket.
    Kline(KlineBar),
    /// Keep-alive reply. Only resets the idle timer.
    Heartbeat,
    /// Subscription acknowledged.
    Ack,
    /// Subscription refused by the source.
    Rejected(String),
}

/// A text message parser: `raw_json -> Vec<FeedFrame>`.
///
/// An `Err` means the frame could not be decoded; the adapter logs it and
/// keeps the socket open. Frames that decode fine but carry nothing of
/// interest return an empty vec.
pub type FrameParser = Box<dyn Fn(&str) -> Result<Vec<FeedFrame>> + Send + Sync>;

/// Ping / keep-alive configuration for a WebSocket connection.
#[derive(Debug, Clone)]
pub struct PingConfig {
    pub interval: Duration,
    pub payload: PingPayload,
}

/// Everything needed to run one exchange feed.
pub struct FeedDef {
    pub source: SourceId,
    /// Log label, e.g. `"feed-okx"`.
    pub label: String,
    pub ws_url: String,
    /// Instrument in the exchange's own format.
    pub symbol: String,
    /// Sent in order right after every (re)connect.
    pub subscribe_msgs: Vec<String>,
    /// Client-initiated keep-alive. `None` for sources that ping the client.
    pub ping: Option<PingConfig>,
    /// How this source's volume figures fold into a candle bucket.
    pub volume_mode: VolumeMode,
    pub parser: FrameParser,
}

impl FeedDef {
    pub fn parse(&self, text: &str) -> Result<Vec<FeedFrame>> {
        (self.parser)(text)
    }
}

impl std::fmt::Debug for FeedDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDef")
            .field("source", &self.source)
            .field("ws_url", &self.ws_url)
            .field("symbol", &self.symbol)
            .field("subscribe_msgs", &self.subscribe_msgs)
            .field("volume_mode", &self.volume_mode)
            .finish_non_exhaustive()
    }
}

/// Runtime form of [`FeedSettingsConfig`], shared by every adapter.
#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub data_timeout: Duration,
    pub min_emit_interval: Duration,
    pub connect_timeout: Duration,
    pub candle_interval_ms: u64,
    pub candle_retention_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettingsConfig::default().into()
    }
}

impl From<FeedSettingsConfig> for FeedSettings {
    fn from(cfg: FeedSettingsConfig) -> Self {
        Self {
            data_timeout: Duration::from_millis(cfg.data_timeout_ms),
            min_emit_interval: Duration::from_millis(cfg.min_emit_interval_ms),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            candle_interval_ms: cfg.candle_interval_ms,
            candle_retention_ms: cfg.candle_retention_ms,
            backoff: cfg.backoff.into(),
        }
    }
}
