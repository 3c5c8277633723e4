//! Typed error definitions for the Lumen connection and market-data layer.
//!
//! Provides [`LumenError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result` at the
//! binary edge.
//!
//! Every variant carries only owned strings and plain values so the error is
//! `Clone`. A single in-flight `connect()` result is shared between concurrent
//! callers, and each of them receives its own copy.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used by all library crates in the workspace.
pub type Result<T> = std::result::Result<T, LumenError>;

/// Domain-specific errors for the Lumen system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LumenError {
    /// Invalid endpoint list or malformed network descriptor. Raised before
    /// any I/O and never retried.
    #[error("config error: {0}")]
    Config(String),

    /// No successful handshake within the timeout window.
    #[error("connection to {url} timed out after {timeout:?}")]
    ConnectionTimeout { url: String, timeout: Duration },

    /// The socket could not be opened or failed while open.
    #[error("socket error on {url}: {reason}")]
    Socket { url: String, reason: String },

    /// The remote side closed the socket without being asked to.
    #[error("connection closed unexpectedly: {0}")]
    UnexpectedClose(String),

    /// A frame could not be decoded into the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The remote source rejected a subscription request.
    #[error("subscription rejected: {0}")]
    Subscription(String),

    /// Background reconnection gave up after the configured attempt budget.
    #[error("gave up after {attempts} reconnect attempts, last error: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    /// Every candidate endpoint of a `connect()` sweep failed.
    #[error("all {attempted} endpoints failed, last error: {last}")]
    AllEndpointsFailed { attempted: usize, last: String },

    /// A request on the connection handle got no response in time.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// An operation needed a live connection and there was none.
    #[error("not connected")]
    NotConnected,

    /// The operation was overtaken by a newer `connect()` or `disconnect()`.
    #[error("superseded by a newer connect/disconnect call")]
    Superseded,
}
