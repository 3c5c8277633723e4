//! Binance-specific configuration extraction.

use lumen_core::config::FeedConfig;
use lumen_core::{LumenError, Result};

/// Public spot stream endpoint (raw stream mode, subscriptions by message).
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Parsed Binance configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceConfig {
    /// Symbol as it appears in Binance payloads (e.g. `"XRPUSDT"`).
    pub symbol: String,
    /// Lowercase stream prefix (e.g. `"xrpusdt"`).
    pub stream_symbol: String,
    pub ws_url: String,
}

impl BinanceConfig {
    pub fn from_feed(feed: &FeedConfig) -> Result<Self> {
        let symbol = to_binance_symbol(&feed.symbol);
        if symbol.is_empty() {
            return Err(LumenError::Config("binance feed needs a symbol".into()));
        }
        Ok(Self {
            stream_symbol: symbol.to_lowercase(),
            symbol,
            ws_url: feed.url.clone().unwrap_or_else(|| BINANCE_WS_URL.to_string()),
        })
    }
}

/// Convert a symbol in any common form (`XRP-USDT`, `xrp/usdt`) to Binance's
/// concatenated uppercase form (`XRPUSDT`).
pub fn to_binance_symbol(symbol: &str) -> String {
    symbol.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_uppercase()
}
