//! Minimal intercepting proxy built on tapproxy.
//!
//! Usage:
//!   intercept <listen-addr> <remote-addr> [--tls host:port] [--h2] [--hex]
//!
//! Listens on `listen-addr` and relays every accepted connection to
//! `remote-addr`, logging traffic through `tracing`. With `--tls` the remote
//! side is dialed over TLS and unwrapped; with `--h2` the byte stream is
//! inspected as HTTP/2 frames.

use std::net::SocketAddr;

use anyhow::{bail, Context};
use tokio::net::{lookup_host, TcpListener};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tapproxy::{DisplayMode, RelaySession, SessionOptions, TracingLogger};

#[tokio::main]
async fn main() -> tapproxy::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let listen = args.next().context("missing <listen-addr>")?;
    let remote = args.next().context("missing <remote-addr>")?;

    let mut tls_endpoint = None;
    let mut inspect = false;
    let mut display = DisplayMode::Text;
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--tls" => tls_endpoint = Some(args.next().context("--tls needs host:port")?),
            "--h2" => inspect = true,
            "--hex" => display = DisplayMode::Hex,
            other => bail!("unknown flag {:?}", other),
        }
    }

    let remote_addr: SocketAddr = lookup_host(&remote)
        .await
        .with_context(|| format!("cannot resolve {}", remote))?
        .next()
        .with_context(|| format!("{} resolved to no addresses", remote))?;

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;
    info!("listening on {} and relaying to {}", listen, remote_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let tls_endpoint = tls_endpoint.clone();

        tokio::spawn(async move {
            let session = match tls_endpoint {
                Some(endpoint) => {
                    RelaySession::new_tls_unwrapped(stream, peer, remote_addr, endpoint)
                }
                None => RelaySession::new(stream, peer, remote_addr),
            }
            .with_options(
                SessionOptions::default()
                    .with_no_delay(true)
                    .with_display(display)
                    .with_http2_inspection(inspect)
                    .with_logger(TracingLogger),
            );

            let stats = session.start().await;
            info!(
                "session {} finished: {} bytes sent, {} bytes received",
                stats.session_id, stats.bytes_sent, stats.bytes_received
            );
        });
    }
}
