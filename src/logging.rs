//! Leveled Logging Interface
//!
//! The relay core never logs directly through a concrete backend. It is handed
//! a [`Logger`] and calls it at four severities; callers that want structured
//! output plug in [`TracingLogger`], everything else defaults to [`NullLogger`].

use tracing::{debug, info, trace, warn};

/// Abstract leveled log sink consumed by the relay core.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn trace(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// Logger that drops every message. Default when no logger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _msg: &str) {}
    fn trace(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
}

/// Logger that forwards each severity to the matching `tracing` macro.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, msg: &str) {
        debug!(target: "tapproxy", "{}", msg);
    }

    fn trace(&self, msg: &str) {
        trace!(target: "tapproxy", "{}", msg);
    }

    fn info(&self, msg: &str) {
        info!(target: "tapproxy", "{}", msg);
    }

    fn warn(&self, msg: &str) {
        warn!(target: "tapproxy", "{}", msg);
    }
}
