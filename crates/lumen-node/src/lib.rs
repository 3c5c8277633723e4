//! # lumen-node
//!
//! Connection to a ledger network.
//!
//! [`ConnectionManager`] keeps at most one WebSocket open to a network, picks
//! the first responsive endpoint from a ranked list and reconnects in the
//! background with bounded exponential backoff after an unsolicited close.
//! While connected it hands out a [`LedgerHandle`] for request/response
//! traffic; everything else the node sends arrives as [`NodeEvent::Stream`].
//!
//! Lifecycle: `connect(&network)` → use `handle()` / observe `events()` →
//! `disconnect()`.

pub mod event;
pub mod handle;
pub mod manager;

pub use event::NodeEvent;
pub use handle::LedgerHandle;
pub use manager::ConnectionManager;
