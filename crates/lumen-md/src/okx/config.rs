//! OKX-specific configuration extraction.
//!
//! Handles symbol format conversion (`XRPUSDT` → `XRP-USDT`) and the
//! keep-alive interval OKX needs to keep idle public sockets open.

use std::time::Duration;

use lumen_core::config::FeedConfig;
use lumen_core::{LumenError, Result};

/// Public v5 endpoint.
pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// OKX drops connections that stay silent for 30s.
pub const OKX_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Parsed OKX configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OkxConfig {
    /// Instrument id in OKX format (e.g. `"XRP-USDT"`).
    pub inst_id: String,
    pub ws_url: String,
}

impl OkxConfig {
    pub fn from_feed(feed: &FeedConfig) -> Result<Self> {
        if feed.symbol.trim().is_empty() {
            return Err(LumenError::Config("okx feed needs a symbol".into()));
        }
        Ok(Self {
            inst_id: to_okx_inst_id(feed.symbol.trim()),
            ws_url: feed.url.clone().unwrap_or_else(|| OKX_WS_URL.to_string()),
        })
    }
}

/// Convert a standard symbol (e.g. `XRPUSDT`) to an OKX spot instId (`XRP-USDT`).
///
/// Tries common quote currencies in order. If no match is found, returns the
/// input uppercased (assumes it is already in OKX format).
pub fn to_okx_inst_id(symbol: &str) -> String {
    let upper = symbol.to_uppercase().replace('/', "-");
    if upper.contains('-') {
        return upper;
    }
    const QUOTES: &[&str] = &["USDT", "USDC", "USD", "BTC", "ETH", "EUR"];
    for q in QUOTES {
        if let Some(base) = upper.strip_suffix(q) {
            if !base.is_empty() {
                return format!("{base}-{q}");
            }
        }
    }
    upper
}
