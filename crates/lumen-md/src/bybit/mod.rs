//! Bybit market data: feed definition.
//!
//! One socket on the public v5 spot endpoint with `tickers.<sym>` (24h
//! volume, replaces) and `kline.1.<sym>`. Keep-alive is `{"op":"ping"}`,
//! answered by an op reply that counts as a heartbeat.

pub mod config;
pub mod json_parser;

use lumen_core::config::FeedConfig;
use lumen_core::ws::PingPayload;
use lumen_core::{Result, SourceId, VolumeMode};

use self::config::{BYBIT_PING_INTERVAL, BybitConfig};
use crate::pipeline::{FeedDef, PingConfig};

/// Build the Bybit feed definition from its config entry.
pub fn build(feed: &FeedConfig) -> Result<FeedDef> {
    let cfg = BybitConfig::from_feed(feed)?;
    let ping = PingConfig {
        interval: BYBIT_PING_INTERVAL,
        payload: PingPayload::Json(serde_json::json!({"req_id": "lumen-ping", "op": "ping"})),
    };
    Ok(FeedDef {
        source: SourceId::Bybit,
        label: "feed-bybit".into(),
        subscribe_msgs: vec![json_parser::build_subscribe(&cfg.symbol)],
        ws_url: cfg.ws_url,
        symbol: cfg.symbol,
        ping: Some(ping),
        volume_mode: VolumeMode::Replace,
        parser: Box::new(json_parser::parse_message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_definition() {
        let feed = FeedConfig {
            exchange: SourceId::Bybit,
            symbol: "xrp-usdt".into(),
            url: None,
            enabled: Some(true),
        };
        let def = build(&feed).unwrap();
        assert_eq!(def.symbol, "XRPUSDT");
        assert_eq!(def.ws_url, config::BYBIT_WS_URL);
        assert_eq!(def.volume_mode, VolumeMode::Replace);
        let ping = def.ping.as_ref().unwrap().payload.to_frame();
        assert!(matches!(ping, lumen_core::ws::WsFrame::Text(t) if t.contains(r#""op":"ping""#)));

        // The ping reply is what keeps the idle timer fed.
        let reply = r#"{"success":true,"ret_msg":"pong","op":"ping"}"#;
        assert_eq!(def.parse(reply).unwrap(), vec![crate::pipeline::FeedFrame::Heartbeat]);
    }
}
