//! # lumen-md
//!
//! Streaming market data from external price sources.
//!
//! ## Architecture
//!
//! Each exchange provides a `build(&FeedConfig) -> Result<FeedDef>` function
//! that describes its WebSocket feed. The generic [`adapter::FeedAdapter`]
//! engine handles the connection, keep-alive, idle supervision, reconnect
//! backoff, candle building and emission throttling. The
//! [`aggregator::FeedAggregator`] fans all adapters in.
//!
//! ## Shared infrastructure
//!
//! - [`pipeline`]: `FeedDef` / `FeedFrame` data-driven definitions
//! - [`adapter`]: the feed engine
//! - [`candle`]: pure candle builder and per-source bucket store
//! - [`json_util`]: JSON parsing helpers

pub mod adapter;
pub mod aggregator;
pub mod binance;
pub mod bybit;
pub mod candle;
pub mod json_util;
pub mod okx;
pub mod pipeline;
pub mod registry;

use async_trait::async_trait;
use lumen_core::events::EventBus;
use lumen_core::{ConnectionState, SourceId};

pub use adapter::{FeedAdapter, FeedEvent};
pub use aggregator::{AggregatorEvent, FeedAggregator};

/// A streaming price source as seen by the aggregator.
///
/// `Sync` is required because the aggregator shares feeds with its start
/// tasks and observers.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn source(&self) -> SourceId;
    /// Start connecting in the background. Idempotent while running.
    fn connect(&self);
    /// Stop, cancelling any idle or reconnect timers, and wait until the
    /// socket is released.
    async fn disconnect(&self);
    fn events(&self) -> &EventBus<FeedEvent>;
    fn state(&self) -> ConnectionState;
}
