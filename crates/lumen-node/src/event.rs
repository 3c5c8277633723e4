//! Event types emitted by the [`ConnectionManager`](crate::ConnectionManager)
//! to observers.
//!
//! Observers subscribe through the manager's event bus and react to
//! connection lifecycle changes and unsolicited ledger stream messages.

use std::time::Duration;

use lumen_core::LumenError;
use serde_json::Value;

/// A typed event emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A handshake with one candidate endpoint started.
    Connecting {
        network: String,
        url: String,
    },

    /// The connection is live. `url` is the pinned endpoint.
    Connected {
        network: String,
        url: String,
    },

    /// The connection went away, either on request or unsolicited.
    Disconnected {
        network: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A background reconnect was scheduled.
    Reconnecting {
        network: String,
        /// 1-based retry number since the last verified connection.
        attempt: u32,
        delay: Duration,
    },

    /// A connect sweep or the reconnect budget failed.
    Error {
        network: String,
        error: LumenError,
    },

    /// An unsolicited message from the ledger node (subscription stream).
    Stream(Value),
}

impl NodeEvent {
    /// Network id the event refers to, if any.
    pub fn network(&self) -> Option<&str> {
        match self {
            Self::Connecting { network, .. }
            | Self::Connected { network, .. }
            | Self::Disconnected { network, .. }
            | Self::Reconnecting { network, .. }
            | Self::Error { network, .. } => Some(network),
            Self::Stream(_) => None,
        }
    }
}
