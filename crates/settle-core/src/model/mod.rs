//! Data model shared between the engine, its host, and the transport layer
//!
//! Timestamps are milliseconds on the host's clock (epoch-based in a browser),
//! kept as `f64` so high-resolution timeline values survive unchanged.

pub mod node;
pub mod record;
pub mod signal;

pub use node::*;
pub use record::*;
pub use signal::*;

/// Milliseconds on the host clock
pub type Millis = f64;

/// Index of a pending event in the event store
pub type EventIndex = usize;

/// Identifier the network interception layer assigns to each call
pub type CallId = u64;
