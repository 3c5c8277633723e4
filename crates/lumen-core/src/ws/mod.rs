//! WebSocket transport: library-neutral frames and traits, the
//! `tokio-tungstenite` implementation, and an in-memory mock (tests and the
//! `test-util` feature only).

pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod transport;

pub use client::{TungsteniteConnector, TungsteniteLink};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockBehavior, MockConnector, MockServer};
pub use transport::{PingPayload, WsConnector, WsFrame, WsLink};
