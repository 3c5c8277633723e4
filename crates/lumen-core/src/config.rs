//! Configuration parsing for the Lumen runner and its components.
//!
//! Everything is read from a single JSON file. The core crates never touch
//! storage: the runner loads the file and hands plain values to each
//! component.
//!
//! # Example config
//!
//! ```json
//! {
//!   "app": { "module_name": "lumen", "log_path": "/tmp/log" },
//!   "network": {
//!     "id": "testnet",
//!     "urls": ["wss://s.altnet.rippletest.net:51233", "wss://testnet.xrpl-labs.com"],
//!     "connect_timeout_ms": 20000,
//!     "backoff": { "base_delay_ms": 1000, "max_delay_ms": 30000, "max_attempts": 5 }
//!   },
//!   "feeds": [
//!     { "exchange": "binance", "symbol": "XRPUSDT" },
//!     { "exchange": "okx", "symbol": "XRPUSDT" },
//!     { "exchange": "bybit", "symbol": "XRPUSDT", "enabled": false }
//!   ],
//!   "feed_settings": { "data_timeout_ms": 30000, "min_emit_interval_ms": 1000 },
//!   "aggregator": { "max_history": 500, "stagger_ms": 1000, "warmup_ms": 3000 }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::backoff::{BackoffConfig, BackoffPolicy};
use crate::error::{LumenError, Result};
use crate::types::{Endpoint, SourceId};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub app: ModuleMeta,

    /// The ledger network to hold a connection to.
    pub network: NetworkConfig,

    /// One entry per external price source.
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// Settings shared by every feed adapter.
    #[serde(default)]
    pub feed_settings: FeedSettingsConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

impl ModuleMeta {
    /// Log file prefix, defaulting to `"lumen"`.
    pub fn module_name(&self) -> String {
        self.module_name.clone().unwrap_or_else(|| "lumen".to_string())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// A ledger network: an id and its candidate endpoint URLs.
///
/// `urls[0]` is the primary; the rest are fallbacks in ranked order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    pub id: String,
    pub urls: Vec<String>,

    /// Per-candidate handshake timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a request/response round trip on the connection handle.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Background reconnection after an unsolicited close.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl NetworkConfig {
    /// Network with default timeouts and backoff.
    pub fn new(id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            id: id.into(),
            urls,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Reject descriptors that can never connect. Runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LumenError::Config("network id is empty".into()));
        }
        if self.urls.is_empty() {
            return Err(LumenError::Config(format!("network '{}' has no endpoint urls", self.id)));
        }
        for raw in &self.urls {
            let parsed = url::Url::parse(raw).map_err(|e| {
                LumenError::Config(format!("network '{}': invalid url '{raw}': {e}", self.id))
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(LumenError::Config(format!(
                    "network '{}': url '{raw}' must use ws:// or wss://",
                    self.id
                )));
            }
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(LumenError::Config(format!(
                "network '{}': connect_timeout_ms and request_timeout_ms must be > 0",
                self.id
            )));
        }
        if !self.backoff.is_valid() {
            return Err(LumenError::Config(format!(
                "network '{}': backoff needs 0 < base_delay_ms <= max_delay_ms",
                self.id
            )));
        }
        Ok(())
    }

    /// Ranked endpoint list: primary first, then fallbacks in order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.urls.iter().enumerate().map(|(rank, url)| Endpoint::new(url.clone(), rank)).collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff.into()
    }
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

/// One external price source.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub exchange: SourceId,
    /// Instrument in exchange-neutral form, e.g. `"XRPUSDT"`.
    pub symbol: String,
    /// Override of the exchange's public WebSocket URL.
    pub url: Option<String>,
    pub enabled: Option<bool>,
}

impl FeedConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Timing shared by every feed adapter.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FeedSettingsConfig {
    /// No frame (data or heartbeat) for this long means the socket is dead.
    pub data_timeout_ms: u64,
    /// Minimum spacing of price emissions per adapter.
    pub min_emit_interval_ms: u64,
    /// Handshake timeout per connection attempt.
    pub connect_timeout_ms: u64,
    pub candle_interval_ms: u64,
    /// Buckets older than this are purged.
    pub candle_retention_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for FeedSettingsConfig {
    fn default() -> Self {
        Self {
            data_timeout_ms: 30_000,
            min_emit_interval_ms: 1_000,
            connect_timeout_ms: 20_000,
            candle_interval_ms: 60_000,
            candle_retention_ms: 3_600_000,
            backoff: BackoffConfig { base_delay_ms: 1_000, max_delay_ms: 30_000, max_attempts: 10 },
        }
    }
}

impl FeedSettingsConfig {
    /// Reject timings that would stall or spin the adapters.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("data_timeout_ms", self.data_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("candle_interval_ms", self.candle_interval_ms),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, v)| *v == 0) {
            return Err(LumenError::Config(format!("feed_settings: {name} must be > 0")));
        }
        if self.candle_retention_ms < self.candle_interval_ms {
            return Err(LumenError::Config(
                "feed_settings: candle_retention_ms must be >= candle_interval_ms".into(),
            ));
        }
        if !self.backoff.is_valid() {
            return Err(LumenError::Config(
                "feed_settings: backoff needs 0 < base_delay_ms <= max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Feed aggregator settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Per-source history cap.
    pub max_history: usize,
    /// Start offset step between adapters.
    pub stagger_ms: u64,
    /// Time after `connect()` at which the aggregator reports ready.
    pub warmup_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { max_history: 500, stagger_ms: 1_000, warmup_ms: 3_000 }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.network.validate()?;
    config.feed_settings.validate()?;
    Ok(config)
}
