//! Integration tests for the relay session over loopback sockets.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use tapproxy::{ByteSink, Logger, RelaySession, SessionOptions, WriteSink};

/// Logger that records every line per level, for asserting on log output.
#[derive(Clone, Default)]
struct RecordingLogger {
    events: Arc<Mutex<Vec<(&'static str, String)>>>,
}

impl RecordingLogger {
    fn lines(&self, level: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, msg: &str) {
        self.events.lock().unwrap().push(("debug", msg.to_string()));
    }
    fn trace(&self, msg: &str) {
        self.events.lock().unwrap().push(("trace", msg.to_string()));
    }
    fn info(&self, msg: &str) {
        self.events.lock().unwrap().push(("info", msg.to_string()));
    }
    fn warn(&self, msg: &str) {
        self.events.lock().unwrap().push(("warn", msg.to_string()));
    }
}

/// Sink writing into shared memory so tests can inspect captures afterwards.
#[derive(Clone, Default)]
struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl ByteSink for SharedSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

/// Sink that always fails, for checking that capture errors are not fatal.
struct BrokenSink;

impl ByteSink for BrokenSink {
    fn append(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "capture disk gone"))
    }
}

/// A connected TCP pair: (client end, session's local end).
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

/// Build a session in front of a fresh remote listener and start it.
async fn start_session(
    opts: SessionOptions,
) -> (
    TcpStream,
    TcpStream,
    tokio::task::JoinHandle<tapproxy::ConnectionStats>,
) {
    let (client, local) = tcp_pair().await;
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote_listener.local_addr().unwrap();
    let local_addr = local.peer_addr().unwrap();

    let session = RelaySession::new(local, local_addr, remote_addr).with_options(opts);
    let handle = tokio::spawn(session.start());

    let (remote, _) = remote_listener.accept().await.unwrap();
    (client, remote, handle)
}

#[tokio::test]
async fn relays_bytes_verbatim_and_counts_them() {
    let logger = RecordingLogger::default();
    let (mut client, mut remote, handle) =
        start_session(SessionOptions::default().with_logger(logger.clone())).await;

    client.write_all(b"GET /\r\n").await.unwrap();

    let mut buf = [0u8; 7];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"GET /\r\n");

    drop(client);
    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

    assert_eq!(stats.bytes_sent, 7);
    assert_eq!(stats.bytes_received, 0);
    assert_eq!(stats.total_bytes, 7);
    // Clean end-of-stream is never a warning.
    assert!(logger.lines("warn").is_empty());
    assert_eq!(
        logger
            .lines("info")
            .iter()
            .filter(|l| l.starts_with("closed"))
            .count(),
        1
    );
}

#[tokio::test]
async fn dial_failure_returns_promptly_without_loops() {
    // Bind then drop to get an address where nothing listens.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = listener.local_addr().unwrap();
    drop(listener);

    let (_client, local) = tcp_pair().await;
    let local_addr = local.peer_addr().unwrap();
    let logger = RecordingLogger::default();

    let session = RelaySession::new(local, local_addr, remote_addr)
        .with_options(SessionOptions::default().with_logger(logger.clone()));

    let stats = timeout(Duration::from_secs(5), session.start())
        .await
        .unwrap();

    assert_eq!(stats.bytes_sent, 0);
    assert_eq!(stats.bytes_received, 0);
    let warns = logger.lines("warn");
    assert_eq!(warns.len(), 1);
    assert!(warns[0].contains("remote connection failed"));
    // No relay ever opened.
    assert!(logger.lines("info").is_empty());
}

#[tokio::test]
async fn replacer_rewrites_forwarded_bytes() {
    let opts = SessionOptions::default()
        .with_replacer(|chunk| chunk.to_ascii_uppercase());
    let (mut client, mut remote, handle) = start_session(opts).await;

    client.write_all(b"abc").await.unwrap();

    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ABC");

    drop(client);
    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    // The counter reflects what was written, i.e. the replaced chunk.
    assert_eq!(stats.bytes_sent, 3);
}

#[tokio::test]
async fn matcher_observes_without_affecting_traffic() {
    let seen: Arc<Mutex<Vec<u8>>> = Arc::default();
    let seen_by_matcher = Arc::clone(&seen);

    let opts = SessionOptions::default().with_matcher(move |chunk| {
        seen_by_matcher.lock().unwrap().extend_from_slice(chunk);
    });
    let (mut client, mut remote, handle) = start_session(opts).await;

    client.write_all(b"do not touch").await.unwrap();

    let mut buf = [0u8; 12];
    remote.read_exact(&mut buf).await.unwrap();
    // Forwarded bytes are exactly what was read, regardless of the matcher.
    assert_eq!(&buf, b"do not touch");
    assert_eq!(seen.lock().unwrap().as_slice(), b"do not touch");

    drop(client);
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn relays_both_directions() {
    let (mut client, mut remote, handle) = start_session(SessionOptions::default()).await;

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    remote.write_all(b"pong").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    drop(remote);
    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.bytes_sent, 4);
    assert_eq!(stats.bytes_received, 4);
    assert_eq!(stats.total_bytes, 8);
}

#[tokio::test]
async fn live_stats_update_while_running() {
    let (client, local) = tcp_pair().await;
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote_listener.local_addr().unwrap();
    let local_addr = local.peer_addr().unwrap();

    let session = RelaySession::new(local, local_addr, remote_addr);
    let stats = session.stats();
    let handle = tokio::spawn(session.start());
    let (mut remote, _) = remote_listener.accept().await.unwrap();

    let mut client = client;
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    remote.read_exact(&mut buf).await.unwrap();

    // The counter is observable before the session ends.
    timeout(Duration::from_secs(5), async {
        while stats.bytes_sent() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    drop(client);
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn teardown_happens_once_when_both_ends_drop() {
    let logger = RecordingLogger::default();
    let (mut client, mut remote, handle) =
        start_session(SessionOptions::default().with_logger(logger.clone())).await;

    client.write_all(b"x").await.unwrap();
    let mut buf = [0u8; 1];
    remote.read_exact(&mut buf).await.unwrap();

    // Drop both ends as close to simultaneously as it gets.
    drop(client);
    drop(remote);

    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.bytes_sent, 1);

    let closed: Vec<_> = logger
        .lines("info")
        .into_iter()
        .filter(|l| l.starts_with("closed"))
        .collect();
    assert_eq!(closed.len(), 1, "teardown must be logged exactly once");
}

#[tokio::test]
async fn outbound_sink_captures_relayed_bytes() {
    let sink = SharedSink::default();
    let opts = SessionOptions::default().with_outbound_sink(sink.clone());
    let (mut client, mut remote, handle) = start_session(opts).await;

    client.write_all(b"captured").await.unwrap();
    let mut buf = [0u8; 8];
    remote.read_exact(&mut buf).await.unwrap();

    drop(client);
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(sink.bytes.lock().unwrap().as_slice(), b"captured");
}

#[tokio::test]
async fn file_sink_captures_to_disk() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let opts = SessionOptions::default()
        .with_outbound_sink(WriteSink::new(file.reopen().unwrap()));
    let (mut client, mut remote, handle) = start_session(opts).await;

    client.write_all(b"GET /\r\n").await.unwrap();
    let mut buf = [0u8; 7];
    remote.read_exact(&mut buf).await.unwrap();

    drop(client);
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(std::fs::read(file.path()).unwrap(), b"GET /\r\n");
}

#[tokio::test]
async fn failing_sink_does_not_stop_the_relay() {
    let opts = SessionOptions::default().with_outbound_sink(BrokenSink);
    let (mut client, mut remote, handle) = start_session(opts).await;

    client.write_all(b"still flowing").await.unwrap();
    let mut buf = [0u8; 13];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still flowing");

    drop(client);
    let stats = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(stats.bytes_sent, 13);
}
