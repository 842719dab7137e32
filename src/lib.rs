//! tapproxy
//!
//! An intercepting TCP relay. A [`RelaySession`] adopts one side of an
//! already-accepted local connection, dials the remote endpoint (optionally
//! unwrapping TLS so the local side sees plaintext), and copies bytes both
//! ways while offering inline match/replace hooks, per-direction capture
//! sinks, and an optional live HTTP/2 frame inspector.

pub mod config;
pub mod connector;
pub mod inspect;
pub mod logging;
pub mod relay;
pub mod sink;
pub mod stream;

pub use config::{DisplayMode, SessionOptions};
pub use logging::{Logger, NullLogger, TracingLogger};
pub use relay::{ConnectionStats, Direction, RelaySession, TrafficStats};
pub use sink::{ByteSink, WriteSink};
pub use stream::RelayStream;

/// Common result type for the crate.
pub type Result<T> = anyhow::Result<T>;
