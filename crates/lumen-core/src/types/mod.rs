//! Core data types: source identifiers, connection state, endpoints, ticks
//! and candles.

pub mod endpoint;
pub mod enums;
pub mod market_data;

pub use endpoint::*;
pub use enums::*;
pub use market_data::*;
