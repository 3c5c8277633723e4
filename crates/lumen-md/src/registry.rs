//! Feed registry: factory for creating feed adapters from config.

use std::sync::Arc;

use lumen_core::config::FeedConfig;
use lumen_core::ws::WsConnector;
use lumen_core::{Result, SourceId};

use crate::adapter::FeedAdapter;
use crate::pipeline::{FeedDef, FeedSettings};

/// Build the [`FeedDef`] for the `exchange` named in the config entry.
pub fn build_def(config: &FeedConfig) -> Result<FeedDef> {
    match config.exchange {
        SourceId::Binance => crate::binance::build(config),
        SourceId::Okx => crate::okx::build(config),
        SourceId::Bybit => crate::bybit::build(config),
    }
}

/// Create a (not yet started) adapter for one config entry.
pub fn create_feed(
    config: &FeedConfig,
    settings: FeedSettings,
    connector: Arc<dyn WsConnector>,
) -> Result<FeedAdapter> {
    Ok(FeedAdapter::new(build_def(config)?, settings, connector))
}
