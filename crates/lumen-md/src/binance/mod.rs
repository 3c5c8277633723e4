//! Binance market data: feed definition.
//!
//! One socket on the public spot stream carrying `<sym>@ticker` (rolling 24h,
//! volume replaces) and `<sym>@kline_1m`. Binance pings the client, so there
//! is no client-side keep-alive; the adapter answers server pings.

pub mod config;
pub mod json_parser;

use lumen_core::config::FeedConfig;
use lumen_core::{Result, SourceId, VolumeMode};

use self::config::BinanceConfig;
use crate::pipeline::FeedDef;

/// Build the Binance feed definition from its config entry.
pub fn build(feed: &FeedConfig) -> Result<FeedDef> {
    let cfg = BinanceConfig::from_feed(feed)?;
    Ok(FeedDef {
        source: SourceId::Binance,
        label: "feed-binance".into(),
        subscribe_msgs: vec![json_parser::build_subscribe(&cfg.stream_symbol)],
        ws_url: cfg.ws_url,
        symbol: cfg.symbol,
        ping: None,
        volume_mode: VolumeMode::Replace,
        parser: Box::new(json_parser::parse_message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_uses_url_override() {
        let feed = FeedConfig {
            exchange: SourceId::Binance,
            symbol: "XRP-USDT".into(),
            url: Some("wss://mirror.example/ws".into()),
            enabled: None,
        };
        let def = build(&feed).unwrap();
        assert_eq!(def.ws_url, "wss://mirror.example/ws");
        assert_eq!(def.symbol, "XRPUSDT");
        assert_eq!(def.volume_mode, VolumeMode::Replace);
        assert!(def.ping.is_none());
        assert!(def.subscribe_msgs[0].contains("xrpusdt@ticker"));
    }
}
