//! # lumen-runner
//!
//! Entry point: holds a connection to the configured ledger network and
//! streams aggregated prices from the enabled exchange feeds.
//!
//! # Usage
//!
//! ```bash
//! lumen-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use lumen_core::logging::LogFormat;
use lumen_core::ws::{TungsteniteConnector, WsConnector};
use lumen_md::pipeline::FeedSettings;
use lumen_md::{AggregatorEvent, FeedAggregator, PriceFeed};
use lumen_node::{ConnectionManager, NodeEvent};
use tracing::{debug, error, info, warn};

/// Ledger connection and market data runner.
#[derive(Parser)]
#[command(name = "lumen-runner", about = "Ledger connection and market data runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Logging
    let format = if cli.json { LogFormat::Json } else { LogFormat::Pretty };
    let log_dir = cli.log_dir.as_deref();
    lumen_core::logging::init_logging(&cli.log_level, log_dir, "lumen-runner", format);
    info!("lumen-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // 2. Configuration
    let config = lumen_core::config::load_config(&cli.config)?;
    info!(
        "config loaded, network={} ({} url(s)), {} feed(s)",
        config.network.id,
        config.network.urls.len(),
        config.feeds.len()
    );

    // 3. Components
    let connector: Arc<dyn WsConnector> = Arc::new(TungsteniteConnector::new());
    let ecm = ConnectionManager::new(Arc::clone(&connector));

    let settings = FeedSettings::from(config.feed_settings);
    let mut feeds: Vec<Arc<dyn PriceFeed>> = Vec::new();
    for (idx, feed) in config.feeds.iter().enumerate() {
        if !feed.is_enabled() {
            info!("feed[{idx}]: {} disabled, skipping", feed.exchange);
            continue;
        }
        match lumen_md::registry::create_feed(feed, settings, Arc::clone(&connector)) {
            Ok(adapter) => {
                info!("feed[{idx}]: created {} ({})", adapter.def().label, adapter.def().symbol);
                feeds.push(Arc::new(adapter));
            }
            Err(e) => error!("feed[{idx}]: failed to create {}: {e}", feed.exchange),
        }
    }
    let aggregator = FeedAggregator::new(feeds, config.aggregator);

    // 4. Observers
    let _node_events = ecm.events().subscribe(|event: &NodeEvent| match event {
        NodeEvent::Connected { network, url } => info!("[node] {network} connected via {url}"),
        NodeEvent::Disconnected { network, reason } => {
            warn!("[node] {network} disconnected: {reason}")
        }
        NodeEvent::Reconnecting { network, attempt, delay } => {
            info!("[node] {network} reconnect attempt {attempt} in {delay:?}")
        }
        NodeEvent::Error { network, error } => error!("[node] {network}: {error}"),
        NodeEvent::Connecting { .. } | NodeEvent::Stream(_) => {}
    });
    let _agg_events = aggregator.events().subscribe(|event: &AggregatorEvent| match event {
        AggregatorEvent::Ready => info!("[agg] warm-up complete"),
        AggregatorEvent::Update(sample) => info!(
            "[agg] {} price={:.6} high={:.6} low={:.6} volume={:.2} sources={:?}",
            sample.timestamp, sample.price, sample.high, sample.low, sample.volume, sample.sources
        ),
        AggregatorEvent::Price(price) => {
            debug!("[agg] {} last={:.6}", price.source, price.last_price())
        }
    });

    // 5. Start
    match ecm.connect(&config.network).await {
        Ok(url) => info!("ledger network {} pinned to {url}", config.network.id),
        // Market data keeps running without the ledger connection.
        Err(e) => error!("ledger network {} unavailable: {e}", config.network.id),
    }
    aggregator.connect();
    info!("running, press Ctrl+C to stop");

    // 6. Shutdown
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    aggregator.disconnect().await;
    ecm.disconnect().await;

    info!("all components stopped");
    Ok(())
}
