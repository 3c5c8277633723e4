//! OKX market data: feed definition.
//!
//! One socket on the public v5 endpoint with `tickers` (price, bid/ask) and
//! `trades` (incremental volume, accumulated into the bucket). Keep-alive is
//! the text `"ping"`, answered with `"pong"`.

pub mod config;
pub mod json_parser;

use lumen_core::config::FeedConfig;
use lumen_core::ws::PingPayload;
use lumen_core::{Result, SourceId, VolumeMode};

use self::config::{OKX_PING_INTERVAL, OkxConfig};
use crate::pipeline::{FeedDef, PingConfig};

/// Build the OKX feed definition from its config entry.
pub fn build(feed: &FeedConfig) -> Result<FeedDef> {
    let cfg = OkxConfig::from_feed(feed)?;
    Ok(FeedDef {
        source: SourceId::Okx,
        label: "feed-okx".into(),
        subscribe_msgs: vec![json_parser::build_subscribe(&cfg.inst_id)],
        ws_url: cfg.ws_url,
        symbol: cfg.inst_id,
        ping: Some(PingConfig {
            interval: OKX_PING_INTERVAL,
            payload: PingPayload::Text("ping".into()),
        }),
        volume_mode: VolumeMode::Accumulate,
        parser: Box::new(json_parser::parse_message),
    })
}
