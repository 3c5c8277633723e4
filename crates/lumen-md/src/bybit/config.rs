//! Bybit-specific configuration extraction.

use std::time::Duration;

use lumen_core::config::FeedConfig;
use lumen_core::{LumenError, Result};

/// Public v5 spot endpoint.
pub const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Bybit recommends a ping every 20s.
pub const BYBIT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Parsed Bybit configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BybitConfig {
    /// Symbol in Bybit format (e.g. `"XRPUSDT"`).
    pub symbol: String,
    pub ws_url: String,
}

impl BybitConfig {
    pub fn from_feed(feed: &FeedConfig) -> Result<Self> {
        let symbol = to_bybit_symbol(&feed.symbol);
        if symbol.is_empty() {
            return Err(LumenError::Config("bybit feed needs a symbol".into()));
        }
        Ok(Self { symbol, ws_url: feed.url.clone().unwrap_or_else(|| BYBIT_WS_URL.to_string()) })
    }
}

/// Bybit uses the concatenated uppercase form: `XRP-USDT` → `XRPUSDT`.
pub fn to_bybit_symbol(symbol: &str) -> String {
    symbol.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_uppercase()
}
