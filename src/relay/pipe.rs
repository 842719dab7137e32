//! Directional Copy Loop
//!
//! One pipe per direction per session. Reads a chunk, runs the optional
//! match/replace hooks, logs, forwards, captures, counts - until the first
//! read or write failure, which it hands to the session's error reporter.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{DisplayMode, Matcher, Replacer};
use crate::logging::Logger;
use crate::relay::session::{ErrorReporter, TrafficStats};
use crate::sink::ByteSink;

/// Read chunk size for the plain copy path.
pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// Which way a pipe carries bytes, fixed when the pipe is spawned. Outbound
/// means the source is the session's local stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub(crate) fn arrow(&self) -> &'static str {
        match self {
            Direction::Outbound => ">>>",
            Direction::Inbound => "<<<",
        }
    }

    pub(crate) fn verb(&self) -> &'static str {
        match self {
            Direction::Outbound => "sent",
            Direction::Inbound => "received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// Shared state one pipe needs from its session.
pub(crate) struct PipeCtx {
    pub direction: Direction,
    pub display: DisplayMode,
    pub matcher: Option<Matcher>,
    pub replacer: Option<Replacer>,
    pub logger: Arc<dyn Logger>,
    pub stats: Arc<TrafficStats>,
    pub reporter: ErrorReporter,
}

/// Relay bytes from `src` to `dst` until the first terminal error, reporting
/// it through the session's single-shot error path.
pub(crate) async fn run_pipe<R, W>(
    mut src: R,
    mut dst: W,
    mut sink: Option<Box<dyn ByteSink>>,
    ctx: PipeCtx,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => {
                ctx.reporter.report_eof();
                return;
            }
            Ok(n) => n,
            Err(e) => {
                ctx.reporter
                    .report(format!("{} read failed: {}", ctx.direction, e));
                return;
            }
        };
        let chunk = &buf[..n];

        // Matcher sees the chunk read-only; it cannot touch what is forwarded.
        if let Some(matcher) = &ctx.matcher {
            matcher(chunk);
        }

        let replaced;
        let chunk = match &ctx.replacer {
            Some(replacer) => {
                replaced = replacer(chunk);
                &replaced[..]
            }
            None => chunk,
        };

        ctx.logger.debug(&format!(
            "{} {} bytes {}",
            ctx.direction.arrow(),
            chunk.len(),
            ctx.direction.verb()
        ));
        ctx.logger.trace(&ctx.display.render(chunk));

        if let Err(e) = dst.write_all(chunk).await {
            ctx.reporter
                .report(format!("{} write failed: {}", ctx.direction, e));
            return;
        }

        // Capture is best effort; a dead sink never stops the relay.
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.append(chunk) {
                ctx.logger
                    .debug(&format!("{} capture sink write failed: {}", ctx.direction, e));
            }
        }

        ctx.stats.add(ctx.direction, chunk.len() as u64);
    }
}
