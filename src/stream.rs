//! Relay Stream Abstraction
//!
//! Both ends of a session are held as [`RelayStream`] trait objects so a
//! plain TCP remote and a TLS-unwrapped remote look identical to the copy
//! loops. Socket tuning is expressed as a capability: transports that can
//! disable Nagle's algorithm override [`RelayStream::set_nodelay`], everything
//! else inherits the no-op default.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Duplex byte stream usable as one end of a relay session.
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Disable (or re-enable) Nagle's algorithm where the transport supports
    /// it. The default is a graceful no-op for transports without the knob.
    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }
}

impl RelayStream for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

impl RelayStream for TlsStream<TcpStream> {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.get_ref().0.set_nodelay(nodelay)
    }
}

/// In-memory duplex pipe, handy for exercising sessions without sockets.
impl RelayStream for tokio::io::DuplexStream {}
