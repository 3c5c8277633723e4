//! Ledger node endpoints.

use serde::{Deserialize, Serialize};

/// One candidate server URL of a network. Rank 0 is the primary, higher
/// ranks are fallbacks tried in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub rank: usize,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, rank: usize) -> Self {
        Self { url: url.into(), rank }
    }

    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (rank {})", self.url, self.rank)
    }
}
