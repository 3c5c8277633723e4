//! OKX JSON message parser.
//!
//! Routes data pushes by the `arg.channel` field:
//!
//! - `tickers` → [`FeedFrame::Ticker`]
//! - `trades` → one [`FeedFrame::Trade`] per trade (volume accumulates)
//!
//! Event replies carry an `event` field instead: `subscribe` is an ack,
//! `error` a rejected subscription. The literal text `pong` answers our ping.

use lumen_core::{PriceTick, Result, SourceId};
use serde_json::Value;

use crate::json_util::{parse_f64_field, parse_json, parse_u64_field};
use crate::pipeline::FeedFrame;

/// Parse an OKX WebSocket text message.
pub fn parse_message(text: &str) -> Result<Vec<FeedFrame>> {
    // OKX echoes "pong" in response to our "ping".
    if text == "pong" {
        return Ok(vec![FeedFrame::Heartbeat]);
    }

    let v = parse_json(text)?;

    if let Some(event) = v.get("event").and_then(Value::as_str) {
        return Ok(parse_event(event, &v).into_iter().collect());
    }

    let Some(channel) = v.get("arg").and_then(|a| a.get("channel")).and_then(Value::as_str) else {
        return Ok(vec![]);
    };
    let Some(data) = v.get("data").and_then(Value::as_array) else {
        return Ok(vec![]);
    };

    let frames = match channel {
        "tickers" => data.iter().filter_map(parse_ticker).collect(),
        "trades" => data.iter().filter_map(parse_trade).collect(),
        _ => vec![],
    };
    Ok(frames)
}

/// Build the subscription message for `tickers` and `trades` of one instrument.
pub fn build_subscribe(inst_id: &str) -> String {
    serde_json::json!({
        "op": "subscribe",
        "args": [
            {"channel": "tickers", "instId": inst_id},
            {"channel": "trades", "instId": inst_id}
        ]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Individual parsers
// ---------------------------------------------------------------------------

fn parse_event(event: &str, v: &Value) -> Option<FeedFrame> {
    match event {
        "subscribe" => Some(FeedFrame::Ack),
        "error" => {
            let code = v.get("code").and_then(Value::as_str).unwrap_or("?");
            let msg = v.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
            Some(FeedFrame::Rejected(format!("{code}: {msg}")))
        }
        _ => None,
    }
}

fn parse_ticker(d: &Value) -> Option<FeedFrame> {
    Some(FeedFrame::Ticker(PriceTick {
        price: Some(parse_f64_field(d, "last")?),
        bid: parse_f64_field(d, "bidPx"),
        ask: parse_f64_field(d, "askPx"),
        volume: parse_f64_field(d, "vol24h"),
        high: parse_f64_field(d, "high24h"),
        low: parse_f64_field(d, "low24h"),
        vwap: None,
        trade_count: None,
        timestamp: parse_u64_field(d, "ts"),
        source: Some(SourceId::Okx),
    }))
}

fn parse_trade(d: &Value) -> Option<FeedFrame> {
    Some(FeedFrame::Trade(PriceTick {
        price: Some(parse_f64_field(d, "px")?),
        volume: parse_f64_field(d, "sz"),
        timestamp: parse_u64_field(d, "ts"),
        source: Some(SourceId::Okx),
        ..Default::default()
    }))
}
