//! Remote Connector
//!
//! Establishes the remote side of a relay session: either a raw TCP dial or a
//! TLS dial whose stream hands the session already-decrypted plaintext. One
//! attempt per session; every failure is returned to the session and treated
//! as fatal there.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::stream::RelayStream;
use crate::Result;

/// Open a plain TCP connection to the remote endpoint.
pub async fn connect_plain(addr: SocketAddr) -> Result<Box<dyn RelayStream>> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("remote connection to {} failed", addr))?;
    Ok(Box::new(stream))
}

/// Open a TLS connection to `endpoint` (`host:port`), unwrapping the
/// encryption so the returned stream reads and writes plaintext.
///
/// The server certificate is validated against the webpki root store and the
/// host part of the endpoint is used as SNI.
pub async fn connect_tls(endpoint: &str) -> Result<Box<dyn RelayStream>> {
    let (host, _port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("TLS endpoint {:?} is not host:port", endpoint))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| anyhow!("invalid TLS server name {:?}: {}", host, e))?;

    let tcp = TcpStream::connect(endpoint)
        .await
        .with_context(|| format!("remote connection to {} failed", endpoint))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {} failed", endpoint))?;

    Ok(Box::new(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_dial_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio_test::assert_ok!(connect_plain(addr).await);
        let _ = listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn plain_dial_refused_is_an_error() {
        // Bind then drop to find a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_plain(addr).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tls_endpoint_must_be_host_port() {
        let result = connect_tls("no-port-here").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("host:port"));
    }
}
