//! Relay Engine
//!
//! The per-connection session object and the directional copy loops it runs.

pub mod pipe;
pub mod session;

pub use pipe::Direction;
pub use session::{ConnectionStats, RelaySession, TrafficStats};
