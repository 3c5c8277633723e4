//! # lumen-core
//!
//! Core crate for the Lumen connection and market-data layer, providing:
//!
//! - **Types** (`types`): source ids, connection state, endpoints, ticks, candles
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `LumenError` via thiserror
//! - **Backoff** (`backoff`): exponential retry policy and per-component counters
//! - **Events** (`events`): publish/subscribe bus with cancellation handles
//! - **WebSocket** (`ws`): transport traits, tungstenite client, in-memory mock
//! - **Time utilities** (`time_util`): epoch-millisecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

pub use error::{LumenError, Result};
// Re-export types at crate root for convenience.
pub use types::*;
