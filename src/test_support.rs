//! Scripted in-process chat server for tests

use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::bot::BotOptions;
use crate::client::{ClientOptions, ProtocolClient, Transport};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Plaintext, fast-retrying client options
pub(crate) fn test_client_options() -> ClientOptions {
    ClientOptions {
        transport: Transport::Plain,
        connect_timeout: Duration::from_secs(1),
        write_timeout: Duration::from_secs(1),
        queue_capacity: 10,
        backoff: Duration::from_millis(50)..Duration::from_millis(60),
        log_commands: true,
    }
}

/// Bot options with short polls and handshake timeouts
pub(crate) fn test_bot_options() -> BotOptions {
    BotOptions {
        client: test_client_options(),
        connect_attempts: 50,
        connect_poll: Duration::from_millis(20),
        handshake_attempts: 5,
        handshake_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_secs(1),
    }
}

pub(crate) async fn wait_online(client: &ProtocolClient) {
    for _ in 0..200 {
        if client.stats().online {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client never came online");
}

pub(crate) struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    /// An address nothing listens on
    pub async fn unused_addr() -> String {
        let server = Self::bind().await;
        server.addr()
    }

    pub fn addr(&self) -> String {
        self.listener.local_addr().unwrap().to_string()
    }

    async fn accept_tcp(&self) -> tokio::net::TcpStream {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        stream
    }

    pub async fn accept(&self) -> MockConn {
        let (reader, writer) = self.accept_tcp().await.into_split();
        MockConn::new(reader, writer)
    }

    /// Accept one client and complete a TLS handshake with a fresh self-signed cert
    pub async fn accept_tls(&self) -> MockConn {
        let tcp = self.accept_tcp().await;
        let stream = tokio::time::timeout(STEP_TIMEOUT, self_signed_acceptor().accept(tcp))
            .await
            .expect("no TLS handshake")
            .unwrap();
        let (reader, writer) = tokio::io::split(stream);
        MockConn::new(reader, writer)
    }
}

fn self_signed_acceptor() -> TlsAcceptor {
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

type PeerReader = Box<dyn AsyncRead + Send + Unpin>;
type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct MockConn {
    reader: BufReader<PeerReader>,
    writer: PeerWriter,
}

impl MockConn {
    fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader) as PeerReader),
            writer: Box::new(writer),
        }
    }

    /// Send one line, appending the terminator
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\n", line).as_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line including its terminator
    pub async fn expect_raw_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("client sent nothing")
            .unwrap();
        line
    }

    /// Next line without its terminator
    pub async fn expect_line(&mut self) -> String {
        self.expect_raw_line().await.trim_end().to_string()
    }

    /// Answer the PASS / JOIN handshake
    pub async fn handshake(&mut self, pass: &str, join: &str) {
        assert_eq!(self.expect_line().await, pass);
        self.send(r#"PASS result="success""#).await;
        assert_eq!(self.expect_line().await, join);
        self.send(r#"JOIN username="bot" bot="true""#).await;
    }
}
