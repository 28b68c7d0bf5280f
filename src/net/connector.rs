//! Connection establishment: DNS resolve → TCP connect → TLS handshake.
//!
//! Each phase is a separate future so the request state machine can report
//! which phase it is in and which one failed. Every future is `'static`: it
//! owns clones of what it needs and can be aborted at any await point.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::certs::CertificateStore;
use crate::config::{ConfigError, TimeoutConfig};
use crate::net::connection::{Connection, TlsSession};
use crate::net::peer::Peer;
use crate::net::tls::client_connector;

/// Establishment phase, used to classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Dns,
    Tcp,
    Tls,
}

impl std::fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectPhase::Dns => write!(f, "name resolution"),
            ConnectPhase::Tcp => write!(f, "tcp connect"),
            ConnectPhase::Tls => write!(f, "tls handshake"),
        }
    }
}

/// Failure to establish a connection, tagged with the phase that failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("could not resolve {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("could not connect to {peer}: {source}")]
    Tcp {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("http handshake with {peer} failed: {reason}")]
    Http { peer: String, reason: String },

    #[error("{phase} did not finish within {after:?}")]
    Timeout { phase: ConnectPhase, after: Duration },
}

impl ConnectError {
    pub fn phase(&self) -> ConnectPhase {
        match self {
            ConnectError::Dns { .. } => ConnectPhase::Dns,
            ConnectError::Tcp { .. } | ConnectError::Http { .. } => ConnectPhase::Tcp,
            ConnectError::Tls { .. } => ConnectPhase::Tls,
            ConnectError::Timeout { phase, .. } => *phase,
        }
    }
}

/// Opens new transports to peers, validating TLS peers against one store.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
    store: Arc<CertificateStore>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("roots", &self.store.len())
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(store: Arc<CertificateStore>, timeouts: &TimeoutConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            tls: client_connector(store.clone())?,
            store,
            connect_timeout: timeouts.connect(),
            handshake_timeout: timeouts.handshake(),
        })
    }

    /// Trust roots used by this connector's handshakes.
    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// Resolve the peer's host to socket addresses.
    pub fn resolve(&self, peer: &Peer) -> impl Future<Output = Result<Vec<SocketAddr>, ConnectError>> + Send + 'static {
        let host = peer.host.clone();
        let port = peer.port;
        let within = self.connect_timeout;

        async move {
            let lookup = tokio::net::lookup_host((host.clone(), port));
            match timeout(within, lookup).await {
                Err(_) => Err(ConnectError::Timeout { phase: ConnectPhase::Dns, after: within }),
                Ok(Err(e)) => Err(ConnectError::Dns { host, reason: e.to_string() }),
                Ok(Ok(addrs)) => {
                    let addrs: Vec<SocketAddr> = addrs.collect();
                    if addrs.is_empty() {
                        Err(ConnectError::Dns { host, reason: "no addresses returned".to_string() })
                    } else {
                        Ok(addrs)
                    }
                }
            }
        }
    }

    /// Connect to the first reachable address, in resolver order.
    pub fn connect(
        &self,
        peer: &Peer,
        addrs: Vec<SocketAddr>,
    ) -> impl Future<Output = Result<TcpStream, ConnectError>> + Send + 'static {
        let label = peer.to_string();
        let within = self.connect_timeout;

        async move {
            let attempt = async {
                let mut last_error = None;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::trace!(%addr, error = %e, "set_nodelay failed");
                            }
                            return Ok(stream);
                        }
                        Err(e) => {
                            tracing::debug!(%addr, error = %e, "Connect attempt failed");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to try")))
            };

            match timeout(within, attempt).await {
                Err(_) => Err(ConnectError::Timeout { phase: ConnectPhase::Tcp, after: within }),
                Ok(Err(source)) => Err(ConnectError::Tcp { peer: label, source }),
                Ok(Ok(stream)) => Ok(stream),
            }
        }
    }

    /// Run the TLS handshake over an open TCP stream.
    pub fn handshake(
        &self,
        peer: &Peer,
        tcp: TcpStream,
    ) -> impl Future<Output = Result<TlsStream<TcpStream>, ConnectError>> + Send + 'static {
        let tls = self.tls.clone();
        let host = peer.host.clone();
        let within = self.handshake_timeout;

        async move {
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| ConnectError::Tls { host: host.clone(), reason: e.to_string() })?;

            match timeout(within, tls.connect(server_name, tcp)).await {
                Err(_) => Err(ConnectError::Timeout { phase: ConnectPhase::Tls, after: within }),
                Ok(Err(e)) => Err(ConnectError::Tls { host, reason: e.to_string() }),
                Ok(Ok(stream)) => Ok(stream),
            }
        }
    }

    /// Run every phase back to back and return a ready connection.
    #[cfg(test)]
    pub async fn establish(&self, peer: &Peer) -> Result<Connection, ConnectError> {
        let addrs = self.resolve(peer).await?;
        let tcp = self.connect(peer, addrs).await?;
        if peer.scheme.requires_tls() {
            let stream = self.handshake(peer, tcp).await?;
            attach_tls(peer.clone(), stream).await
        } else {
            attach_http(peer.clone(), tcp, None).await
        }
    }
}

/// Start HTTP/1.1 over an encrypted stream, recording the negotiated session.
pub async fn attach_tls(peer: Peer, stream: TlsStream<TcpStream>) -> Result<Connection, ConnectError> {
    let (_, session) = stream.get_ref();
    let tls = TlsSession {
        protocol: session.protocol_version().map(|v| format!("{:?}", v)),
        cipher_suite: session.negotiated_cipher_suite().map(|s| format!("{:?}", s.suite())),
    };
    attach_http(peer, stream, Some(tls)).await
}

/// Start HTTP/1.1 over `io` and spawn the task that drives the transport.
///
/// The driver task ends when the returned [`Connection`] is dropped or the
/// peer closes the transport.
pub async fn attach_http<IO>(peer: Peer, io: IO, tls: Option<TlsSession>) -> Result<Connection, ConnectError>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, driver) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ConnectError::Http { peer: peer.to_string(), reason: e.to_string() })?;

    let connection = Connection::new(peer, sender, tls);
    let id = connection.id();
    tracing::debug!(
        connection_id = %id,
        peer = %connection.peer(),
        tls = connection.tls().is_some(),
        "Connection established"
    );

    tokio::spawn(async move {
        match driver.await {
            Ok(()) => tracing::trace!(connection_id = %id, "Connection closed"),
            Err(e) => tracing::debug!(connection_id = %id, error = %e, "Connection closed with error"),
        }
    });

    Ok(connection)
}
