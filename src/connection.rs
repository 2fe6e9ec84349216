//! Connection loop actor
//!
//! The only place that touches the socket. The loop alternates between a
//! connect phase (dial, retry forever with a randomized backoff) and a serve
//! phase (answer queued read and write requests against the live socket).
//! Any I/O failure on the live socket ends the serve phase: the gate closes,
//! one read caller is told about the disconnect and the loop reconnects.

use std::io;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientOptions, ReadRequest, SharedStats, Transport, WriteRequest};
use crate::command::Command;
use crate::error::ClientError;
use crate::parser;
use crate::tls;

/// Any byte stream the loop can serve
trait ChatStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChatStream for T {}

type BoxedStream = Box<dyn ChatStream>;

/// A read waiting for the next line
struct PendingRead {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    reply: oneshot::Sender<Result<Command, ClientError>>,
}

/// Why the serve phase ended
enum Served {
    /// The client was closed
    Stopped,
    /// The socket failed; reconnect
    Lost,
}

pub(crate) struct ConnectionLoop {
    host: String,
    options: ClientOptions,
    writes: mpsc::Receiver<WriteRequest>,
    reads: mpsc::Receiver<ReadRequest>,
    gate: watch::Sender<bool>,
    stats: SharedStats,
    cancel: CancellationToken,
    /// Built on the first TLS dial and reused by every reconnect
    tls: Option<TlsConnector>,
    /// A disconnect happened while no read was waiting; the next read reports it
    owe_end_of_stream: bool,
}

impl ConnectionLoop {
    pub(crate) fn new(
        host: String,
        options: ClientOptions,
        writes: mpsc::Receiver<WriteRequest>,
        reads: mpsc::Receiver<ReadRequest>,
        gate: watch::Sender<bool>,
        stats: SharedStats,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            options,
            writes,
            reads,
            gate,
            stats,
            cancel,
            tls: None,
            owe_end_of_stream: false,
        }
    }

    /// Run until the client is closed
    pub(crate) async fn run(mut self) {
        info!("Connection loop for {} started", self.host);

        while let Some(stream) = self.connect_phase().await {
            match self.serve(stream).await {
                Served::Stopped => break,
                Served::Lost => {
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }

        self.gate.send_replace(false);
        self.stats.update(|stats| {
            stats.online = false;
            stats.started_at = None;
        });
        info!("Connection loop for {} stopped", self.host);
    }

    /// Dial until connected; `None` once the client is closed
    async fn connect_phase(&mut self) -> Option<BoxedStream> {
        loop {
            let attempt = match self.prepare_tls() {
                Ok(()) => tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    attempt = self.dial() => attempt,
                },
                Err(e) => Err(e),
            };

            match attempt {
                Ok(stream) => {
                    self.connected();
                    return Some(stream);
                }
                Err(e) => {
                    self.connect_failed(&e);
                    if !self.backoff().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Build the TLS connector once, for TLS transports
    fn prepare_tls(&mut self) -> io::Result<()> {
        if let (Transport::Tls { verify }, None) = (self.options.transport, &self.tls) {
            self.tls = Some(tls::connector(verify).map_err(io::Error::other)?);
        }
        Ok(())
    }

    async fn dial(&self) -> io::Result<BoxedStream> {
        let connect = async {
            let tcp = TcpStream::connect(&self.host).await?;
            match &self.tls {
                None => Ok(Box::new(tcp) as BoxedStream),
                Some(connector) => {
                    let name = tls::server_name(&self.host).map_err(io::Error::other)?;
                    let stream = connector.connect(name, tcp).await?;
                    Ok(Box::new(stream) as BoxedStream)
                }
            }
        };

        tokio::time::timeout(self.options.connect_timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }

    async fn serve(&mut self, stream: BoxedStream) -> Served {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        // survives cancelled reads so a timeout never drops partial input
        let mut line = Vec::new();
        let mut pending: Option<PendingRead> = None;

        loop {
            let deadline = pending.as_ref().and_then(|read| read.deadline);

            tokio::select! {
                _ = self.cancel.cancelled() => return Served::Stopped,

                Some(request) = self.writes.recv() => {
                    if let Err(e) = self.write_line(&mut writer, request).await {
                        self.disconnected(&e.to_string(), pending.take());
                        return Served::Lost;
                    }
                }

                Some(request) = self.reads.recv(), if pending.is_none() => {
                    if self.owe_end_of_stream {
                        self.owe_end_of_stream = false;
                        let _ = request.reply.send(Err(ClientError::EndOfStream));
                    } else {
                        pending = Some(PendingRead {
                            timeout: request.timeout,
                            deadline: request.timeout.map(|timeout| Instant::now() + timeout),
                            reply: request.reply,
                        });
                    }
                }

                read = reader.read_until(b'\n', &mut line), if pending.is_some() => {
                    match read {
                        Ok(0) if line.is_empty() => {
                            self.disconnected("end of stream", pending.take());
                            return Served::Lost;
                        }
                        Ok(_) => {
                            let parsed = parser::parse(&line).map_err(ClientError::from);
                            self.log_line("read", &String::from_utf8_lossy(&line));
                            line.clear();
                            if let Some(read) = pending.take() {
                                let _ = read.reply.send(parsed);
                            }
                        }
                        Err(e) => {
                            self.disconnected(&e.to_string(), pending.take());
                            return Served::Lost;
                        }
                    }
                }

                _ = sleep_until(deadline), if deadline.is_some() => {
                    if let Some(read) = pending.take() {
                        let timeout = read.timeout.unwrap_or_default();
                        let _ = read.reply.send(Err(ClientError::ReadTimeout(timeout)));
                    }
                }

                _ = reply_closed(&mut pending), if pending.is_some() => {
                    debug!("Read caller for {} went away", self.host);
                    pending = None;
                }
            }
        }
    }

    /// Write one request; an `Err` means the socket is broken
    async fn write_line(
        &self,
        writer: &mut WriteHalf<BoxedStream>,
        request: WriteRequest,
    ) -> io::Result<()> {
        let timeout = request.timeout.unwrap_or(self.options.write_timeout);
        let mut bytes = request.message.into_bytes();
        bytes.push(b'\n');

        let written = tokio::time::timeout(timeout, async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                self.log_line("wrote", &String::from_utf8_lossy(&bytes));
                let _ = request.reply.send(Ok(()));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = request.reply.send(Err(ClientError::WriteFailed(e.to_string())));
                Err(e)
            }
            Err(_) => {
                let _ = request.reply.send(Err(ClientError::WriteTimeout(timeout)));
                Ok(())
            }
        }
    }

    fn log_line(&self, direction: &str, line: &str) {
        let line = line.trim_end();
        if self.options.log_commands {
            debug!("{} {}: {}", direction, self.host, line);
        } else {
            trace!("{} {}: {}", direction, self.host, line);
        }
    }

    /// Sleep a random backoff; `false` if the client was closed meanwhile
    async fn backoff(&self) -> bool {
        let delay = backoff_delay(&self.options);
        debug!("Reconnecting to {} in {:?}", self.host, delay);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn connected(&mut self) {
        self.stats.update(|stats| {
            stats.online = true;
            stats.started_at = Some(chrono::Utc::now());
            stats.last_error = None;
        });
        self.gate.send_replace(true);
        info!("Connected to {}", self.host);
    }

    fn connect_failed(&mut self, error: &io::Error) {
        warn!("Connection to {} failed: {}. Trying again", self.host, error);
        self.stats.update(|stats| {
            stats.online = false;
            stats.started_at = None;
            stats.last_error = Some(error.to_string());
            stats.retry_count += 1;
        });
    }

    /// Mark the connection lost and deliver the single end-of-stream notice
    fn disconnected(&mut self, reason: &str, pending: Option<PendingRead>) {
        warn!("Connection to {} lost: {}", self.host, reason);
        self.stats.update(|stats| {
            stats.online = false;
            stats.started_at = None;
            stats.last_error = Some(reason.to_string());
        });
        self.gate.send_replace(false);

        match pending {
            Some(read) => {
                let _ = read.reply.send(Err(ClientError::EndOfStream));
            }
            None => self.owe_end_of_stream = true,
        }
    }
}

fn backoff_delay(options: &ClientOptions) -> Duration {
    if options.backoff.is_empty() {
        return options.backoff.start;
    }
    rand::thread_rng().gen_range(options.backoff.clone())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn reply_closed(pending: &mut Option<PendingRead>) {
    match pending {
        Some(read) => read.reply.closed().await,
        None => std::future::pending().await,
    }
}
