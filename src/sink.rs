//! Capture Sinks
//!
//! A [`ByteSink`] is an append-only destination a copy loop writes relayed
//! chunks into, typically a capture file. Sink failures are reported to the
//! caller but never terminate a relay.

use std::io::{self, Write};

/// Append-only byte destination attached to one relay direction.
pub trait ByteSink: Send {
    /// Append a chunk. Errors are surfaced to the copy loop, which logs and
    /// keeps relaying.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Adapter turning any blocking [`Write`] (a `File`, a `Vec<u8>` behind a
/// cursor, ...) into a [`ByteSink`].
pub struct WriteSink<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Consume the adapter and hand back the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> ByteSink for WriteSink<W> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_sink_appends_in_order() {
        let mut sink = WriteSink::new(Vec::new());
        sink.append(b"hello ").unwrap();
        sink.append(b"world").unwrap();
        assert_eq!(sink.into_inner(), b"hello world");
    }

    #[test]
    fn write_sink_propagates_io_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = WriteSink::new(Broken);
        assert!(sink.append(b"x").is_err());
    }
}
