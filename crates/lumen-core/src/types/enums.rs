//! Enumerations used throughout the connection and market-data layer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Price sources
// ---------------------------------------------------------------------------

/// External price sources with a streaming feed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Binance,
    Okx,
    Bybit,
}

impl SourceId {
    /// All known sources, in the order the aggregator starts them.
    pub const ALL: [SourceId; 3] = [SourceId::Binance, SourceId::Okx, SourceId::Bybit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceId {
    type Err = crate::error::LumenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "okx" => Ok(Self::Okx),
            "bybit" => Ok(Self::Bybit),
            other => Err(crate::error::LumenError::Config(format!("unknown exchange: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of a managed connection.
///
/// Exactly one value is current per manager. It only changes through the
/// manager's own transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume semantics
// ---------------------------------------------------------------------------

/// How a source's volume figure folds into a candle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// The figure is a rolling total (e.g. 24h volume). Replace the bucket value.
    Replace,
    /// The figure is incremental trade volume. Add it to the bucket value.
    Accumulate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_round_trips_through_str() {
        for source in SourceId::ALL {
            let parsed: SourceId = source.to_string().parse().unwrap();
            assert_eq!(parsed, source);
        }
        assert_eq!("OKX".parse::<SourceId>().unwrap(), SourceId::Okx);
        assert!("kraken".parse::<SourceId>().is_err());
    }

    #[test]
    fn source_id_serde_lowercase() {
        let json = serde_json::to_string(&SourceId::Bybit).unwrap();
        assert_eq!(json, "\"bybit\"");
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
