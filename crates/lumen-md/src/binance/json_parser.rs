//! Binance JSON message parser.
//!
//! Routes by the `e` (event type) field:
//!
//! - `24hrTicker` → [`FeedFrame::Ticker`] (rolling 24h figures)
//! - `kline` → [`FeedFrame::Kline`]
//!
//! Subscription replies carry an `id` instead: `{"result":null,"id":1}` is an
//! ack, `{"error":{...},"id":1}` a rejection.

use lumen_core::{PriceTick, Result, SourceId};
use serde_json::Value;

use crate::candle::KlineBar;
use crate::json_util::{parse_f64_field, parse_json, parse_u64_field};
use crate::pipeline::FeedFrame;

/// Parse a Binance JSON WebSocket message.
pub fn parse_message(text: &str) -> Result<Vec<FeedFrame>> {
    let v = parse_json(text)?;

    if v.get("id").is_some() {
        return Ok(vec![parse_reply(&v)]);
    }

    let frame = match v.get("e").and_then(Value::as_str) {
        Some("24hrTicker") => parse_ticker(&v),
        Some("kline") => parse_kline(&v),
        _ => None,
    };
    Ok(frame.into_iter().collect())
}

/// Build the subscription message for the ticker and 1m kline streams.
pub fn build_subscribe(stream_symbol: &str) -> String {
    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": [format!("{stream_symbol}@ticker"), format!("{stream_symbol}@kline_1m")],
        "id": 1
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Individual parsers
// ---------------------------------------------------------------------------

fn parse_reply(v: &Value) -> FeedFrame {
    match v.get("error") {
        Some(err) => {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
            let msg = err.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
            FeedFrame::Rejected(format!("{code}: {msg}"))
        }
        None => FeedFrame::Ack,
    }
}

fn parse_ticker(v: &Value) -> Option<FeedFrame> {
    Some(FeedFrame::Ticker(PriceTick {
        price: Some(parse_f64_field(v, "c")?),
        bid: parse_f64_field(v, "b"),
        ask: parse_f64_field(v, "a"),
        volume: parse_f64_field(v, "v"),
        high: parse_f64_field(v, "h"),
        low: parse_f64_field(v, "l"),
        vwap: parse_f64_field(v, "w"),
        trade_count: parse_u64_field(v, "n"),
        timestamp: parse_u64_field(v, "E"),
        source: Some(SourceId::Binance),
    }))
}

fn parse_kline(v: &Value) -> Option<FeedFrame> {
    let k = v.get("k")?;
    let volume = parse_f64_field(k, "v")?;
    // Quote volume over base volume is the bar's own VWAP.
    let vwap = parse_f64_field(k, "q").filter(|_| volume > 0.0).map(|q| q / volume);

    Some(FeedFrame::Kline(KlineBar {
        start: parse_u64_field(k, "t")?,
        open: parse_f64_field(k, "o")?,
        high: parse_f64_field(k, "h")?,
        low: parse_f64_field(k, "l")?,
        close: parse_f64_field(k, "c")?,
        volume,
        vwap,
        trade_count: parse_u64_field(k, "n"),
    }))
}
