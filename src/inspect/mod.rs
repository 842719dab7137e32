//! Protocol Frame Inspector
//!
//! Alternative body for a directional pipe: every byte read is still forwarded
//! to the destination (the read is tapped, not redirected), but the stream is
//! also re-parsed as HTTP/2 framing and each frame is logged. The outbound
//! direction gates on the client connection preface before any frame parsing;
//! the inbound direction starts directly in frame reading.

pub mod frame;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::pipe::{Direction, PipeCtx};
use self::frame::{decode_header_fragment, Frame, CONNECTION_PREFACE};

/// Read chunk size for the tap.
const TAP_CHUNK: usize = 16 * 1024;

/// Run the inspection path for one direction until the first terminal error,
/// reporting it through the session's single-shot error path.
pub(crate) async fn run_inspector<R, W>(src: R, dst: W, ctx: PipeCtx)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tap = Tap {
        src,
        dst,
        chunk: vec![0u8; TAP_CHUNK],
        buf: BytesMut::new(),
        ctx,
    };

    if tap.ctx.direction == Direction::Outbound && !tap.expect_preface().await {
        return;
    }

    while let Some(frame) = tap.next_frame().await {
        tap.log_frame(&frame);
    }
}

/// Forwarding reader: reads from `src`, writes everything through to `dst`,
/// and accumulates the same bytes in `buf` for the frame parser.
struct Tap<R, W> {
    src: R,
    dst: W,
    chunk: Vec<u8>,
    buf: BytesMut,
    ctx: PipeCtx,
}

enum Fill {
    Data,
    Eof,
}

impl<R, W> Tap<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Pull one chunk through the tap. Forwarded bytes count toward this
    /// direction's traffic counter, same as the plain path.
    async fn fill(&mut self) -> std::io::Result<Fill> {
        let n = self.src.read(&mut self.chunk).await?;
        if n == 0 {
            return Ok(Fill::Eof);
        }
        self.dst.write_all(&self.chunk[..n]).await?;
        self.buf.extend_from_slice(&self.chunk[..n]);
        self.ctx.stats.add(self.ctx.direction, n as u64);
        Ok(Fill::Data)
    }

    /// Consume and verify the 24-byte client connection preface. Returns
    /// false after reporting if the stream is short or does not match.
    async fn expect_preface(&mut self) -> bool {
        while self.buf.len() < CONNECTION_PREFACE.len() {
            match self.fill().await {
                Ok(Fill::Data) => {}
                Ok(Fill::Eof) => {
                    self.ctx.reporter.report(format!(
                        "{} stream ended before the HTTP/2 preface ({} of {} bytes)",
                        self.ctx.direction,
                        self.buf.len(),
                        CONNECTION_PREFACE.len()
                    ));
                    return false;
                }
                Err(e) => {
                    self.ctx
                        .reporter
                        .report(format!("{} read failed for preface: {}", self.ctx.direction, e));
                    return false;
                }
            }
        }

        let preface = self.buf.split_to(CONNECTION_PREFACE.len());
        if &preface[..] != CONNECTION_PREFACE {
            self.ctx.reporter.report(format!(
                "not a valid HTTP/2 preface: {:?}",
                String::from_utf8_lossy(&preface)
            ));
            return false;
        }
        self.ctx.logger.debug("HTTP/2 client connection preface verified");
        true
    }

    /// Read the next complete frame off the tapped stream. `None` ends the
    /// loop; the cause has already been reported.
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match Frame::parse(&mut self.buf) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => {
                    self.ctx
                        .reporter
                        .report(format!("{} frame error: {}", self.ctx.direction, e));
                    return None;
                }
            }
            match self.fill().await {
                Ok(Fill::Data) => {}
                Ok(Fill::Eof) if self.buf.is_empty() => {
                    // Clean close on a frame boundary.
                    self.ctx.reporter.report_eof();
                    return None;
                }
                Ok(Fill::Eof) => {
                    self.ctx.reporter.report(format!(
                        "{} stream ended inside a frame ({} trailing bytes)",
                        self.ctx.direction,
                        self.buf.len()
                    ));
                    return None;
                }
                Err(e) => {
                    self.ctx
                        .reporter
                        .report(format!("{} read failed: {}", self.ctx.direction, e));
                    return None;
                }
            }
        }
    }

    fn log_frame(&self, frame: &Frame) {
        let arrow = self.ctx.direction.arrow();
        let logger = &self.ctx.logger;
        match frame {
            Frame::Settings { entries, .. } => {
                logger.info(&format!("{} {}", arrow, frame));
                for entry in entries {
                    logger.info(&format!("{} {}", arrow, entry));
                }
            }
            Frame::Headers { fragment, .. } => {
                logger.info(&format!("{} {}", arrow, frame));
                match decode_header_fragment(fragment) {
                    Ok(fields) => {
                        for (name, value) in fields {
                            logger.info(&format!("{} {}: {}", arrow, name, value));
                        }
                    }
                    Err(e) => logger.warn(&format!("{} header block decode failed: {}", arrow, e)),
                }
            }
            Frame::Data { payload, .. } => {
                logger.info(&format!("{} {}", arrow, frame));
                logger.trace(&self.ctx.display.render(payload));
            }
            Frame::Ping { .. } | Frame::WindowUpdate { .. } => {
                logger.info(&format!("{} {}", arrow, frame));
            }
            // Unhandled frame kinds are relayed but not described.
            Frame::Other { .. } => {}
        }
    }
}
