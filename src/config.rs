//! Session Configuration
//!
//! Everything a caller can set on a relay session before starting it. Options
//! are plain data plus a handful of injected collaborators (callbacks, capture
//! sinks, the logger); all of it is frozen once `start` runs.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::logging::{Logger, NullLogger};
use crate::sink::ByteSink;

/// Read-only inspection hook invoked with every relayed chunk.
pub type Matcher = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Mutation hook; its return value replaces the chunk that gets forwarded.
pub type Replacer = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// How relayed payloads are rendered in trace-level logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Lossy UTF-8 string rendering.
    #[default]
    Text,
    /// Contiguous lowercase hex.
    Hex,
    /// Verbose `[1, 2, 3]` byte-list rendering.
    Bytes,
}

impl DisplayMode {
    /// Render a payload according to the selected mode.
    pub fn render(&self, bytes: &[u8]) -> String {
        match self {
            DisplayMode::Text => String::from_utf8_lossy(bytes).into_owned(),
            DisplayMode::Hex => {
                let mut out = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    let _ = write!(out, "{:02x}", b);
                }
                out
            }
            DisplayMode::Bytes => format!("{:?}", bytes),
        }
    }
}

/// Per-session options, set before `start` and immutable afterwards.
pub struct SessionOptions {
    /// Disable Nagle's algorithm on both streams where supported.
    pub no_delay: bool,
    /// Payload rendering mode for trace logs.
    pub display: DisplayMode,
    /// Re-parse the byte stream as HTTP/2 frames for live inspection.
    pub inspect_http2: bool,
    /// Read-only hook over every relayed chunk.
    pub matcher: Option<Matcher>,
    /// Chunk replacement hook.
    pub replacer: Option<Replacer>,
    /// Capture sink for the local-to-remote direction.
    pub outbound_sink: Option<Box<dyn ByteSink>>,
    /// Capture sink for the remote-to-local direction.
    pub inbound_sink: Option<Box<dyn ByteSink>>,
    /// Leveled log sink; defaults to a no-op logger.
    pub logger: Arc<dyn Logger>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            no_delay: false,
            display: DisplayMode::default(),
            inspect_http2: false,
            matcher: None,
            replacer: None,
            outbound_sink: None,
            inbound_sink: None,
            logger: Arc::new(NullLogger),
        }
    }
}

impl SessionOptions {
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_display(mut self, display: DisplayMode) -> Self {
        self.display = display;
        self
    }

    pub fn with_http2_inspection(mut self, inspect: bool) -> Self {
        self.inspect_http2 = inspect;
        self
    }

    pub fn with_matcher(mut self, matcher: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    pub fn with_replacer(
        mut self,
        replacer: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.replacer = Some(Arc::new(replacer));
        self
    }

    pub fn with_outbound_sink(mut self, sink: impl ByteSink + 'static) -> Self {
        self.outbound_sink = Some(Box::new(sink));
        self
    }

    pub fn with_inbound_sink(mut self, sink: impl ByteSink + 'static) -> Self {
        self.inbound_sink = Some(Box::new(sink));
        self
    }

    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("no_delay", &self.no_delay)
            .field("display", &self.display)
            .field("inspect_http2", &self.inspect_http2)
            .field("matcher", &self.matcher.is_some())
            .field("replacer", &self.replacer.is_some())
            .field("outbound_sink", &self.outbound_sink.is_some())
            .field("inbound_sink", &self.inbound_sink.is_some())
            .finish()
    }
}
