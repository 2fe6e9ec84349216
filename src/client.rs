//! Protocol client handle
//!
//! `ProtocolClient` is the caller-facing side of one chat connection. All I/O
//! happens in the background [`ConnectionLoop`]; callers send it requests
//! through bounded queues, each carrying a private reply channel, and wait for
//! the answer.

use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::Command;
use crate::connection::ConnectionLoop;
use crate::error::ClientError;

/// How the socket is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// TLS over TCP; `verify: false` accepts any server certificate
    Tls { verify: bool },
    /// Plain TCP
    Plain,
}

/// Protocol client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Socket transport (legacy default: TLS without verification)
    pub transport: Transport,
    /// Bound on one dial + TLS handshake
    pub connect_timeout: Duration,
    /// Write deadline used when the caller passes none
    pub write_timeout: Duration,
    /// Capacity of the read and write request queues
    pub queue_capacity: usize,
    /// Randomized delay between reconnect attempts
    pub backoff: Range<Duration>,
    /// Log every line read and written at debug level
    pub log_commands: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tls { verify: false },
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            queue_capacity: 10,
            backoff: Duration::from_secs(1)..Duration::from_secs(3),
            log_commands: false,
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// A connection is currently established
    pub online: bool,
    /// Last connection error, cleared on connect
    pub last_error: Option<String>,
    /// Failed connection attempts since the client started
    pub retry_count: u64,
    /// When the current connection was established
    pub started_at: Option<DateTime<Utc>>,
    /// Age of the current connection (snapshots only)
    pub uptime: Option<Duration>,
}

/// Write request sent to the connection loop
#[derive(Debug)]
pub(crate) struct WriteRequest {
    pub message: String,
    pub timeout: Option<Duration>,
    pub reply: oneshot::Sender<Result<(), ClientError>>,
}

/// Read request sent to the connection loop
#[derive(Debug)]
pub(crate) struct ReadRequest {
    pub timeout: Option<Duration>,
    pub reply: oneshot::Sender<Result<Command, ClientError>>,
}

/// Shared statistics, written only by the connection loop
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<RwLock<Stats>>);

impl SharedStats {
    pub fn update(&self, f: impl FnOnce(&mut Stats)) {
        let mut stats = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    pub fn snapshot(&self) -> Stats {
        let mut stats = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime = stats
            .started_at
            .and_then(|started| (Utc::now() - started).to_std().ok());
        stats
    }
}

/// Handle to one resilient chat connection
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct ProtocolClient {
    host: String,
    writes: mpsc::Sender<WriteRequest>,
    reads: mpsc::Sender<ReadRequest>,
    /// Connection-available signal; `true` while a socket is up
    gate: watch::Receiver<bool>,
    stats: SharedStats,
    cancel: CancellationToken,
}

impl ProtocolClient {
    /// Start connecting to `host` (`host:port`) in the background
    ///
    /// Returns immediately; the loop retries until it connects or the client
    /// is closed. Must be called from within a tokio runtime.
    pub fn connect(host: impl Into<String>, options: ClientOptions) -> Self {
        let host = host.into();
        let capacity = options.queue_capacity.max(1);
        let (write_tx, write_rx) = mpsc::channel(capacity);
        let (read_tx, read_rx) = mpsc::channel(capacity);
        let (gate_tx, gate_rx) = watch::channel(false);
        let stats = SharedStats::default();
        let cancel = CancellationToken::new();

        let conn = ConnectionLoop::new(
            host.clone(),
            options,
            write_rx,
            read_rx,
            gate_tx,
            stats.clone(),
            cancel.clone(),
        );
        tokio::spawn(conn.run());

        Self {
            host,
            writes: write_tx,
            reads: read_tx,
            gate: gate_rx,
            stats,
            cancel,
        }
    }

    /// The `host:port` this client connects to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Write one line; the terminator is appended
    ///
    /// Waits while the connection is down. `None` uses the configured
    /// default write timeout.
    pub async fn write(
        &self,
        message: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<(), ClientError> {
        self.wait_for_connection().await?;
        let (reply, rx) = oneshot::channel();
        self.writes
            .send(WriteRequest {
                message: message.into(),
                timeout,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Read and parse one line
    ///
    /// Waits while the connection is down. `None` waits for a line without a
    /// deadline. A lost connection is reported once as
    /// [`ClientError::EndOfStream`].
    pub async fn read(&self, timeout: Option<Duration>) -> Result<Command, ClientError> {
        self.wait_for_connection().await?;
        let (reply, rx) = oneshot::channel();
        self.reads
            .send(ReadRequest { timeout, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Snapshot of the connection statistics
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Stop the connection loop
    ///
    /// Pending and later calls fail with [`ClientError::Closed`].
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing client for {}", self.host);
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn wait_for_connection(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let mut gate = self.gate.clone();
        let open = async move { gate.wait_for(|open| *open).await.is_ok() };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            open = open => if open { Ok(()) } else { Err(ClientError::Closed) },
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Verb;
    use crate::error::ParseError;
    use crate::test_support::{test_client_options, wait_online, MockServer};

    #[tokio::test]
    async fn test_write_appends_terminator() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let mut conn = server.accept().await;

        client.write("SAY hello", None).await.unwrap();

        assert_eq!(conn.expect_raw_line().await, "SAY hello\n");
    }

    #[tokio::test]
    async fn test_read_parses_line() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let mut conn = server.accept().await;

        conn.send(r#"JOIN username="james" bot="false""#).await;
        let cmd = client.read(None).await.unwrap();

        assert_eq!(cmd.name, Verb::Join);
        assert_eq!(cmd.get("username"), "james");
    }

    #[tokio::test]
    async fn test_parse_error_only_fails_one_read() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let mut conn = server.accept().await;

        conn.send(r#"BAD x="1""#).await;
        conn.send(r#"SAY message="ok""#).await;

        assert!(matches!(
            client.read(None).await,
            Err(ClientError::Parse(ParseError::BadVerb(_)))
        ));
        assert_eq!(client.read(None).await.unwrap().get("message"), "ok");
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_partial_line() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let mut conn = server.accept().await;

        conn.send_raw(b"SAY message=\"hel").await;
        let err = client
            .read(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::ReadTimeout(Duration::from_millis(50)));

        conn.send_raw(b"lo\"\n").await;
        let cmd = client.read(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(cmd.get("message"), "hello");
    }

    #[tokio::test]
    async fn test_pending_read_does_not_block_writes() {
        let server = MockServer::bind().await;
        let client = Arc::new(ProtocolClient::connect(
            server.addr(),
            test_client_options(),
        ));
        let mut conn = server.accept().await;

        let reader = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.read(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.write("SAY while reading", None).await.unwrap();
        assert_eq!(conn.expect_line().await, "SAY while reading");

        conn.send(r#"SAY message="late""#).await;
        let cmd = reader.await.unwrap().unwrap();
        assert_eq!(cmd.get("message"), "late");
    }

    #[tokio::test]
    async fn test_end_of_stream_then_reconnect() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let conn = server.accept().await;
        wait_online(&client).await;

        drop(conn);
        assert_eq!(client.read(None).await, Err(ClientError::EndOfStream));

        let stats = client.stats();
        assert!(!stats.online);
        assert!(stats.started_at.is_none());

        // the write waits for the reconnect
        let (written, mut conn) = tokio::join!(client.write("SAY back", None), server.accept());
        written.unwrap();
        assert_eq!(conn.expect_line().await, "SAY back");

        let stats = client.stats();
        assert!(stats.online);
        assert!(stats.started_at.is_some());
        assert_eq!(stats.retry_count, 0);
    }

    #[tokio::test]
    async fn test_write_failure_owes_end_of_stream_to_next_read() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        let conn = server.accept().await;
        wait_online(&client).await;
        drop(conn);

        // the first writes after the peer goes away may still land in the socket buffer
        let mut failed = false;
        for i in 0..50 {
            match client.write(format!("SAY {}", i), None).await {
                Ok(()) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(ClientError::WriteFailed(_)) => {
                    failed = true;
                    break;
                }
                Err(e) => panic!("unexpected write error: {}", e),
            }
        }
        assert!(failed);
        assert!(!client.stats().online);

        let mut conn = server.accept().await;
        conn.send(r#"SAY message="x""#).await;

        assert_eq!(client.read(None).await, Err(ClientError::EndOfStream));
        assert_eq!(client.read(None).await.unwrap().get("message"), "x");
    }

    #[tokio::test]
    async fn test_write_timeout_keeps_connection() {
        let server = MockServer::bind().await;
        let client = ProtocolClient::connect(server.addr(), test_client_options());
        // never reads, so the socket buffers eventually fill
        let _conn = server.accept().await;

        let timeout = Duration::from_millis(50);
        let payload = format!("SAY {}", "x".repeat(1 << 20));
        let mut timed_out = false;
        for _ in 0..256 {
            match client.write(payload.clone(), Some(timeout)).await {
                Ok(()) => {}
                Err(e) => {
                    assert_eq!(e, ClientError::WriteTimeout(timeout));
                    timed_out = true;
                    break;
                }
            }
        }

        assert!(timed_out);
        assert!(client.stats().online);
    }

    #[tokio::test]
    async fn test_default_transport_talks_tls_without_verification() {
        let server = MockServer::bind().await;
        let options = ClientOptions {
            transport: ClientOptions::default().transport,
            ..test_client_options()
        };
        assert_eq!(options.transport, Transport::Tls { verify: false });

        let client = ProtocolClient::connect(server.addr(), options);
        let mut conn = server.accept_tls().await;

        client.write("PASS k s", None).await.unwrap();
        assert_eq!(conn.expect_raw_line().await, "PASS k s\n");

        conn.send(r#"PASS result="success""#).await;
        let cmd = client.read(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(cmd.name, Verb::Pass);
        assert_eq!(cmd.get("result"), "success");
    }

    #[tokio::test]
    async fn test_connect_failure_counts_retries() {
        let addr = MockServer::unused_addr().await;
        let client = ProtocolClient::connect(addr, test_client_options());

        let mut retried = false;
        for _ in 0..200 {
            let stats = client.stats();
            if stats.retry_count >= 2 {
                assert!(!stats.online);
                assert!(stats.last_error.is_some());
                retried = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(retried);
        client.close();
    }

    #[tokio::test]
    async fn test_close_fails_waiting_and_later_calls() {
        let server = MockServer::bind().await;
        let client = Arc::new(ProtocolClient::connect(
            server.addr(),
            test_client_options(),
        ));
        let _conn = server.accept().await;
        wait_online(&client).await;

        let reader = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.read(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.close();
        assert_eq!(reader.await.unwrap(), Err(ClientError::Closed));
        assert_eq!(client.write("SAY x", None).await, Err(ClientError::Closed));
        assert!(client.is_closed());
    }
}
