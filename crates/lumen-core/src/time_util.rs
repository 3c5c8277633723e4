//! Wall-clock time helpers.
//!
//! Candle buckets and sample grouping use Unix-epoch milliseconds. Timers
//! (backoff, idle supervision, throttling) use `tokio::time::Instant`
//! instead, so they follow the runtime clock and can be paused in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
