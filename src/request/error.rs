//! Client-visible request failures.

use serde::{Deserialize, Serialize};

use crate::net::{ConnectError, ConnectPhase};

/// Failure class reported in `RequestFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Name resolution failed.
    Dns,
    /// TCP connection could not be established.
    Connect,
    /// TLS handshake failed or the peer chain was untrusted.
    Tls,
    /// Read or write failure on an established transport.
    Transport,
    /// A bounded phase did not finish in time.
    Timeout,
    /// The redirect chain exceeded the configured maximum.
    TooManyRedirects,
    /// Method, URL, scheme or headers could not form a request.
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Dns => "dns",
            ErrorKind::Connect => "connect",
            ErrorKind::Tls => "tls",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal request failure: its class plus a detail for presentation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl RequestError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Transport, detail.to_string())
    }

    pub fn invalid(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidRequest, detail.to_string())
    }
}

impl From<ConnectError> for RequestError {
    fn from(err: ConnectError) -> Self {
        let kind = match (&err, err.phase()) {
            (ConnectError::Timeout { .. }, _) => ErrorKind::Timeout,
            (_, ConnectPhase::Dns) => ErrorKind::Dns,
            (_, ConnectPhase::Tcp) => ErrorKind::Connect,
            (_, ConnectPhase::Tls) => ErrorKind::Tls,
        };
        RequestError::new(kind, err.to_string())
    }
}
