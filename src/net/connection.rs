//! Established transport connections.
//!
//! # Responsibilities
//! - Own the HTTP/1.1 send handle of one established transport
//! - Generate unique connection IDs for tracing
//! - Record TLS session details for encrypted peers
//! - Report whether the transport is still fit for reuse

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::{Request, Response};

use crate::net::peer::Peer;
use crate::net::pool::Pooled;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Negotiated parameters of an encrypted transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    pub protocol: Option<String>,
    pub cipher_suite: Option<String>,
}

/// Response future produced by dispatching a request on a connection.
pub type ResponseFuture = Pin<Box<dyn Future<Output = hyper::Result<Response<Incoming>>> + Send>>;

/// One established HTTP/1.1 transport to a peer.
///
/// Owned by the pool while idle and moved into exactly one request while in
/// flight. Dropping it closes the transport.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: Peer,
    sender: SendRequest<Full<Bytes>>,
    tls: Option<TlsSession>,
    reusable: bool,
    requests_served: u64,
}

impl Connection {
    pub(crate) fn new(peer: Peer, sender: SendRequest<Full<Bytes>>, tls: Option<TlsSession>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            sender,
            tls,
            reusable: true,
            requests_served: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn tls(&self) -> Option<&TlsSession> {
        self.tls.as_ref()
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// The peer asked to close after the current exchange.
    pub fn mark_unreusable(&mut self) {
        self.reusable = false;
    }

    /// Wait until the connection can take another request.
    pub async fn ready(&mut self) -> hyper::Result<()> {
        self.sender.ready().await
    }

    /// Hand a request to the transport. The returned future resolves once the
    /// response header block has been parsed.
    pub fn dispatch(&mut self, request: Request<Full<Bytes>>) -> ResponseFuture {
        self.requests_served += 1;
        Box::pin(self.sender.send_request(request))
    }
}

impl Pooled for Connection {
    fn peer(&self) -> &Peer {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.reusable && !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
        assert_eq!(id1.to_string(), format!("conn-{}", id1.as_u64()));
    }
}
