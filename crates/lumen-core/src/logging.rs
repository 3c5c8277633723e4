//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output (colored, human-readable, or JSON lines)
//! - File output (daily rotation via `tracing-appender`)
//! - Configurable log level via env var `RUST_LOG` or explicit parameter
//!
//! Components log with a bracketed label prefix (`[ecm]`, `[feed-okx]`,
//! `[aggregator]`) so interleaved output from concurrent sockets stays
//! readable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start by the composition root. Library
/// crates only emit events and never install a subscriber themselves.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` env var is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: used as the log file prefix (e.g. `"lumen"`)
/// - `format`: console output format
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (pretty, json) = match format {
        LogFormat::Pretty => (Some(fmt::layer().with_target(true).with_ansi(true)), None),
        LogFormat::Json => {
            (None, Some(fmt::layer().json().with_target(true).with_current_span(false)))
        }
    };

    let file_layer = log_dir.map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, module_name);
        fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true)
    });

    tracing_subscriber::registry().with(env_filter).with(pretty).with(json).with(file_layer).init();
}
