//! Shared JSON parsing helpers used by all exchange parsers.
//!
//! Exchanges encode numbers either as JSON strings (`"0.5123"`) or as native
//! numbers, sometimes both within one payload.

use lumen_core::LumenError;
use serde_json::Value;

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    let parsed = if let Some(s) = v.as_str() { fast_float2::parse(s).ok() } else { v.as_f64() };
    parsed.filter(|f| f.is_finite())
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() { s.parse().ok() } else { v.as_u64() }
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// Parse a named field on a JSON object as `u64` (string or number).
#[inline]
pub fn parse_u64_field(v: &Value, key: &str) -> Option<u64> {
    parse_str_u64(v.get(key))
}

/// Decode a text frame into a JSON value, mapping failures to a parse error.
pub fn parse_json(text: &str) -> Result<Value, LumenError> {
    serde_json::from_str(text)
        .map_err(|e| LumenError::Parse(format!("{e}: {}", truncate(text, 120))))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
