//! Shared utilities for integration testing.
//!
//! Mock origins are raw `TcpListener`s speaking just enough HTTP/1.1 to
//! exercise the service: keep-alive, chunked bodies, redirects and responses
//! that never arrive.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use request_service::certs::CertificateStore;
use request_service::client::ServiceClient;
use request_service::config::ServiceConfig;
use request_service::protocol::ServiceEvent;
use request_service::service::{Service, ServiceHandle};
use request_service::Shutdown;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Config with short bounds suitable for tests.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.timeouts.connect_secs = 5;
    config.timeouts.handshake_secs = 5;
    config.timeouts.idle_secs = 30;
    config.timeouts.eviction_interval_ms = 100;
    config
}

/// A request as the origin saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
enum ReplyBody {
    Fixed(Vec<u8>),
    Chunked(Vec<Vec<u8>>, Duration),
    Hang,
}

/// Canned response built by a handler.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: ReplyBody,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self::status(200).body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ReplyBody::Fixed(Vec::new()),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).header("Location", location)
    }

    /// Never answer; hold the connection open.
    pub fn hang() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: ReplyBody::Hang,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = ReplyBody::Fixed(body.as_bytes().to_vec());
        self
    }

    /// Send `chunks` with chunked encoding, pausing `delay` before each one.
    pub fn chunked(mut self, chunks: &[&str], delay: Duration) -> Self {
        self.body = ReplyBody::Chunked(chunks.iter().map(|c| c.as_bytes().to_vec()).collect(), delay);
        self
    }

    fn closes(&self) -> bool {
        self.headers
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
    }
}

type Handler = Arc<dyn Fn(&Seen) -> Reply + Send + Sync>;

/// A running mock origin.
pub struct Origin {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Seen>>>,
    task: JoinHandle<()>,
}

impl Origin {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), path)
    }

    pub fn tls_url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.addr.port(), path)
    }

    /// Transport connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a plain HTTP origin on 127.0.0.1.
pub async fn spawn_origin<F>(handler: F) -> Origin
where
    F: Fn(&Seen) -> Reply + Send + Sync + 'static,
{
    start(Arc::new(handler), None).await
}

/// Start an HTTPS origin presenting the `server.pem` fixture (signed by `ca.pem`).
pub async fn spawn_tls_origin<F>(handler: F) -> Origin
where
    F: Fn(&Seen) -> Reply + Send + Sync + 'static,
{
    start(Arc::new(handler), Some(tls_acceptor())).await
}

fn tls_acceptor() -> TlsAcceptor {
    let certs: Vec<CertificateDer<'static>> = {
        let mut reader = std::io::BufReader::new(std::fs::File::open(fixture("server.pem")).unwrap());
        rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>().unwrap()
    };
    let key: PrivateKeyDer<'static> = {
        let mut reader = std::io::BufReader::new(std::fs::File::open(fixture("server.key")).unwrap());
        rustls_pemfile::private_key(&mut reader).unwrap().unwrap()
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn start(handler: Handler, tls: Option<TlsAcceptor>) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let counter = accepted.clone();
    let log = seen.clone();
    let task = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            let log = log.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(socket).await {
                            serve_connection(stream, handler, log).await;
                        }
                    }
                    None => serve_connection(socket, handler, log).await,
                }
            });
        }
    });

    Origin {
        addr,
        accepted,
        seen,
        task,
    }
}

async fn serve_connection<S>(mut stream: S, handler: Handler, log: Arc<Mutex<Vec<Seen>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let Some(seen) = read_request(&mut stream, &mut buf).await else {
            return;
        };
        let reply = handler(&seen);
        log.lock().unwrap().push(seen);

        if write_reply(&mut stream, &reply).await.is_err() || reply.closes() {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Option<Seen> {
    let mut scratch = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&scratch[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    buf.drain(..head_end + 4);

    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < length {
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&scratch[..n]);
    }
    let body = buf.drain(..length).collect();

    Some(Seen {
        method,
        target,
        headers,
        body,
    })
}

async fn write_reply<S: AsyncWrite + Unpin>(stream: &mut S, reply: &Reply) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }

    match &reply.body {
        ReplyBody::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        ReplyBody::Fixed(body) => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(body).await?;
            stream.flush().await
        }
        ReplyBody::Chunked(chunks, delay) => {
            head.push_str("Transfer-Encoding: chunked\r\n\r\n");
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;
            for chunk in chunks {
                tokio::time::sleep(*delay).await;
                stream.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
                stream.write_all(chunk).await?;
                stream.write_all(b"\r\n").await?;
                stream.flush().await?;
            }
            tokio::time::sleep(*delay).await;
            stream.write_all(b"0\r\n\r\n").await?;
            stream.flush().await
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        404 => "Not Found",
        _ => "Unknown",
    }
}

/// A service running on the test runtime, reachable over in-memory channels.
pub struct TestService {
    pub handle: ServiceHandle,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestService {
    pub async fn start(config: ServiceConfig, roots: &[PathBuf]) -> Self {
        let store = CertificateStore::load(roots).unwrap();
        let service = Service::new(config, store).unwrap();
        let handle = service.handle();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(service.run(None, shutdown.subscribe()));
        Self { handle, shutdown, task }
    }

    /// Service trusting the test CA.
    pub async fn trusting_test_ca(config: ServiceConfig) -> Self {
        Self::start(config, &[fixture("ca.pem")]).await
    }

    /// Open a new client channel.
    pub fn connect(&self) -> ServiceClient<DuplexStream> {
        let (client_end, service_end) = tokio::io::duplex(64 * 1024);
        self.handle.attach(service_end).unwrap();
        ServiceClient::new(client_end)
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Read events until the terminal one for `id`, failing the test if that
/// takes longer than `within`.
pub async fn events_until_done(
    client: &mut ServiceClient<DuplexStream>,
    id: request_service::protocol::RequestId,
    within: Duration,
) -> Vec<ServiceEvent> {
    tokio::time::timeout(within, async {
        let mut events = Vec::new();
        loop {
            let event = client.next_event().await.unwrap().expect("channel closed early");
            let done = event.request_id() == id && event.is_terminal();
            events.push(event);
            if done {
                return events;
            }
        }
    })
    .await
    .expect("request did not finish in time")
}
