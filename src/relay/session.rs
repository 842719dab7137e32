//! Relay Session
//!
//! One session per intercepted connection. The session owns the local stream
//! handed to it at construction, dials the remote end exactly once, runs the
//! two directional pipes, and tears everything down after the first terminal
//! error from either direction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::SessionOptions;
use crate::connector;
use crate::inspect;
use crate::logging::Logger;
use crate::relay::pipe::{run_pipe, Direction, PipeCtx};
use crate::stream::RelayStream;

/// Byte counters shared by the two pipes. Each counter has exactly one
/// writer (its direction), so relaxed atomics are sufficient; keep that
/// one-writer property if new metrics are added.
#[derive(Debug, Default)]
pub struct TrafficStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TrafficStats {
    /// Bytes written to the remote stream (local to remote).
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Bytes written to the local stream (remote to local).
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, direction: Direction, n: u64) {
        match direction {
            Direction::Outbound => self.bytes_sent.fetch_add(n, Ordering::Relaxed),
            Direction::Inbound => self.bytes_received.fetch_add(n, Ordering::Relaxed),
        };
    }
}

/// Final statistics returned by [`RelaySession::start`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub session_id: String,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub duration_ms: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub total_bytes: u64,
}

/// Single-shot "first failure wins" reporter shared by both pipes.
///
/// The signal channel has capacity one, so the losing direction's redundant
/// `try_send` is dropped instead of blocking its task forever. Clean
/// end-of-stream still fires the signal but is never logged as a warning.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    erred: Arc<AtomicBool>,
    tx: mpsc::Sender<()>,
    logger: Arc<dyn Logger>,
}

impl ErrorReporter {
    pub(crate) fn new(tx: mpsc::Sender<()>, logger: Arc<dyn Logger>) -> Self {
        Self {
            erred: Arc::new(AtomicBool::new(false)),
            tx,
            logger,
        }
    }

    /// Report a terminal failure; logged at warn level if this is the first.
    pub(crate) fn report(&self, msg: String) {
        self.fire(Some(msg));
    }

    /// Report a clean end-of-stream; fires the signal without a warning.
    pub(crate) fn report_eof(&self) {
        self.fire(None);
    }

    fn fire(&self, warning: Option<String>) {
        if self.erred.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(msg) = warning {
            self.logger.warn(&msg);
        }
        let _ = self.tx.try_send(());
    }
}

/// An intercepting relay between an accepted local connection and a remote
/// endpoint.
pub struct RelaySession {
    id: Uuid,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    local: Box<dyn RelayStream>,
    tls_endpoint: Option<String>,
    opts: SessionOptions,
    stats: Arc<TrafficStats>,
}

impl RelaySession {
    /// Create a session that will dial the remote address over plain TCP.
    /// Takes ownership of the local stream; it is closed when the session
    /// finishes.
    pub fn new(
        local: impl RelayStream + 'static,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            local_addr,
            remote_addr,
            local: Box::new(local),
            tls_endpoint: None,
            opts: SessionOptions::default(),
            stats: Arc::new(TrafficStats::default()),
        }
    }

    /// Create a session that dials `endpoint` (`host:port`) over TLS and
    /// relays the unwrapped plaintext, so the local side can speak in clear.
    pub fn new_tls_unwrapped(
        local: impl RelayStream + 'static,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        endpoint: impl Into<String>,
    ) -> Self {
        let mut session = Self::new(local, local_addr, remote_addr);
        session.tls_endpoint = Some(endpoint.into());
        session
    }

    /// Replace the session options. Must happen before [`start`](Self::start).
    pub fn with_options(mut self, opts: SessionOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Live view of the byte counters, usable while the session runs.
    pub fn stats(&self) -> Arc<TrafficStats> {
        Arc::clone(&self.stats)
    }

    /// Dial the remote endpoint and relay until either direction fails.
    ///
    /// All failures surface as log lines; the returned statistics reflect
    /// whatever was transferred before teardown. Both streams are closed by
    /// the time this returns.
    pub async fn start(self) -> ConnectionStats {
        let RelaySession {
            id,
            local_addr,
            remote_addr,
            local,
            tls_endpoint,
            opts,
            stats,
        } = self;
        let logger = Arc::clone(&opts.logger);
        let started = Instant::now();

        // One connection attempt per session, never a redial.
        let dialed = match &tls_endpoint {
            Some(endpoint) => connector::connect_tls(endpoint).await,
            None => connector::connect_plain(remote_addr).await,
        };
        let remote = match dialed {
            Ok(remote) => remote,
            Err(e) => {
                logger.warn(&format!("remote connection failed: {:#}", e));
                return snapshot(id, local_addr, remote_addr, started, &stats);
            }
        };

        if opts.no_delay {
            for (name, stream) in [("local", &local), ("remote", &remote)] {
                if let Err(e) = stream.set_nodelay(true) {
                    logger.debug(&format!("set_nodelay on {} stream failed: {}", name, e));
                }
            }
        }

        logger.info(&format!("opened {} >>> {}", local_addr, remote_addr));

        let (err_tx, mut err_rx) = mpsc::channel(1);
        let reporter = ErrorReporter::new(err_tx, Arc::clone(&logger));

        let SessionOptions {
            display,
            inspect_http2,
            matcher,
            replacer,
            outbound_sink,
            inbound_sink,
            ..
        } = opts;

        let ctx = |direction| PipeCtx {
            direction,
            display,
            matcher: matcher.clone(),
            replacer: replacer.clone(),
            logger: Arc::clone(&logger),
            stats: Arc::clone(&stats),
            reporter: reporter.clone(),
        };
        let outbound_ctx = ctx(Direction::Outbound);
        let inbound_ctx = ctx(Direction::Inbound);

        let (local_rd, local_wr) = tokio::io::split(local);
        let (remote_rd, remote_wr) = tokio::io::split(remote);

        let outbound = tokio::spawn(async move {
            if inspect_http2 {
                inspect::run_inspector(local_rd, remote_wr, outbound_ctx).await;
            } else {
                run_pipe(local_rd, remote_wr, outbound_sink, outbound_ctx).await;
            }
        });
        let inbound = tokio::spawn(async move {
            if inspect_http2 {
                inspect::run_inspector(remote_rd, local_wr, inbound_ctx).await;
            } else {
                run_pipe(remote_rd, local_wr, inbound_sink, inbound_ctx).await;
            }
        });

        // First error from either direction wakes us exactly once.
        let _ = err_rx.recv().await;

        // Dropping the halves closes both streams; awaiting after abort makes
        // sure the tasks are gone before the counters are read.
        outbound.abort();
        inbound.abort();
        let _ = outbound.await;
        let _ = inbound.await;

        let result = snapshot(id, local_addr, remote_addr, started, &stats);
        logger.info(&format!(
            "closed {} >>> {} ({} bytes sent, {} bytes received)",
            local_addr, remote_addr, result.bytes_sent, result.bytes_received
        ));
        result
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("tls_endpoint", &self.tls_endpoint)
            .field("opts", &self.opts)
            .finish()
    }
}

fn snapshot(
    id: Uuid,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    started: Instant,
    stats: &TrafficStats,
) -> ConnectionStats {
    let bytes_sent = stats.bytes_sent();
    let bytes_received = stats.bytes_received();
    ConnectionStats {
        session_id: id.to_string(),
        local_addr,
        remote_addr,
        duration_ms: started.elapsed().as_millis() as u64,
        bytes_sent,
        bytes_received,
        total_bytes: bytes_sent + bytes_received,
    }
}
