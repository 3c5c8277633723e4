//! Bybit JSON message parser.
//!
//! Data pushes are routed by the `topic` prefix:
//!
//! - `tickers.<sym>` → [`FeedFrame::Ticker`] (24h volume, replaces)
//! - `kline.1.<sym>` → one [`FeedFrame::Kline`] per bar in `data`
//!
//! Operation replies carry `op` and `success`: a successful `ping` is a
//! heartbeat, a successful `subscribe` an ack, and any `"success":false`
//! reply a rejection.

use lumen_core::{PriceTick, Result, SourceId};
use serde_json::Value;

use crate::candle::KlineBar;
use crate::json_util::{parse_f64_field, parse_json, parse_u64_field};
use crate::pipeline::FeedFrame;

/// Parse a Bybit WebSocket text message.
pub fn parse_message(text: &str) -> Result<Vec<FeedFrame>> {
    let v = parse_json(text)?;

    if let Some(op) = v.get("op").and_then(Value::as_str) {
        return Ok(vec![parse_op_reply(op, &v)]);
    }

    let Some(topic) = v.get("topic").and_then(Value::as_str) else {
        return Ok(vec![]);
    };

    let frames = if topic.starts_with("tickers.") {
        parse_ticker(&v).into_iter().collect()
    } else if topic.starts_with("kline.") {
        match v.get("data").and_then(Value::as_array) {
            Some(bars) => bars.iter().filter_map(parse_kline).collect(),
            None => vec![],
        }
    } else {
        vec![]
    };
    Ok(frames)
}

/// Build the subscription message for the ticker and 1m kline topics.
pub fn build_subscribe(symbol: &str) -> String {
    serde_json::json!({
        "req_id": "lumen-sub",
        "op": "subscribe",
        "args": [format!("tickers.{symbol}"), format!("kline.1.{symbol}")]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Individual parsers
// ---------------------------------------------------------------------------

fn parse_op_reply(op: &str, v: &Value) -> FeedFrame {
    let success = v.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !success {
        let msg = v.get("ret_msg").and_then(Value::as_str).unwrap_or("unknown error");
        return FeedFrame::Rejected(format!("{op}: {msg}"));
    }
    match op {
        "ping" | "pong" => FeedFrame::Heartbeat,
        _ => FeedFrame::Ack,
    }
}

fn parse_ticker(v: &Value) -> Option<FeedFrame> {
    let d = v.get("data")?;
    Some(FeedFrame::Ticker(PriceTick {
        price: Some(parse_f64_field(d, "lastPrice")?),
        // Only linear tickers carry the top of book.
        bid: parse_f64_field(d, "bid1Price"),
        ask: parse_f64_field(d, "ask1Price"),
        volume: parse_f64_field(d, "volume24h"),
        high: parse_f64_field(d, "highPrice24h"),
        low: parse_f64_field(d, "lowPrice24h"),
        vwap: None,
        trade_count: None,
        timestamp: parse_u64_field(v, "ts"),
        source: Some(SourceId::Bybit),
    }))
}

fn parse_kline(d: &Value) -> Option<FeedFrame> {
    let volume = parse_f64_field(d, "volume")?;
    let vwap = parse_f64_field(d, "turnover").filter(|_| volume > 0.0).map(|t| t / volume);
    Some(FeedFrame::Kline(KlineBar {
        start: parse_u64_field(d, "start")?,
        open: parse_f64_field(d, "open")?,
        high: parse_f64_field(d, "high")?,
        low: parse_f64_field(d, "low")?,
        close: parse_f64_field(d, "close")?,
        volume,
        vwap,
        trade_count: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spot_ticker() {
        let json = r#"{"topic":"tickers.XRPUSDT","ts":1700000012345,"type":"snapshot","cs":1,"data":{"symbol":"XRPUSDT","lastPrice":"0.6105","highPrice24h":"0.62","lowPrice24h":"0.59","prevPrice24h":"0.6","volume24h":"51000000","turnover24h":"31000000","price24hPcnt":"0.0175","usdIndexPrice":"0.6104"}}"#;
        let frames = parse_message(json).unwrap();
        match frames.as_slice() {
            [FeedFrame::Ticker(t)] => {
                assert_eq!(t.price, Some(0.6105));
                assert_eq!(t.volume, Some(51_000_000.0));
                assert_eq!(t.high, Some(0.62));
                assert_eq!(t.bid, None);
                assert_eq!(t.timestamp, Some(1_700_000_012_345));
            }
            other => panic!("expected one ticker, got {other:?}"),
        }
    }

    #[test]
    fn parse_kline_bars() {
        let json = r#"{"topic":"kline.1.XRPUSDT","type":"snapshot","ts":1700000012345,"data":[{"start":1700000000000,"end":1700000059999,"interval":"1","open":"0.61","close":"0.6105","high":"0.611","low":"0.6095","volume":"20000","turnover":"12200","confirm":false,"timestamp":1700000012345}]}"#;
        let frames = parse_message(json).unwrap();
        match frames.as_slice() {
            [FeedFrame::Kline(bar)] => {
                assert_eq!(bar.start, 1_700_000_000_000);
                assert_eq!(bar.low, 0.6095);
                assert_eq!(bar.volume, 20_000.0);
                assert!((bar.vwap.unwrap() - 0.61).abs() < 1e-12);
            }
            other => panic!("expected one kline, got {other:?}"),
        }
    }

    #[test]
    fn op_replies() {
        let pong = r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#;
        assert_eq!(parse_message(pong).unwrap(), vec![FeedFrame::Heartbeat]);

        let ack =
            r#"{"success":true,"ret_msg":"","conn_id":"x","req_id":"lumen-sub","op":"subscribe"}"#;
        assert_eq!(parse_message(ack).unwrap(), vec![FeedFrame::Ack]);

        let nack =
            r#"{"success":false,"ret_msg":"Invalid symbol :[tickers.NOPE]","op":"subscribe"}"#;
        assert_eq!(
            parse_message(nack).unwrap(),
            vec![FeedFrame::Rejected("subscribe: Invalid symbol :[tickers.NOPE]".into())]
        );
    }

    #[test]
    fn unknown_topic_is_ignored() {
        assert!(parse_message(r#"{"topic":"orderbook.1.XRPUSDT","data":{}}"#).unwrap().is_empty());
        assert!(parse_message(r#"{"hello":1}"#).unwrap().is_empty());
    }

    #[test]
    fn subscribe_message() {
        let v: Value = serde_json::from_str(&build_subscribe("XRPUSDT")).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["args"][0], "tickers.XRPUSDT");
        assert_eq!(v["args"][1], "kline.1.XRPUSDT");
    }
}
