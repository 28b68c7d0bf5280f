//! Remote endpoint identity used as the connection reuse key.

use url::{Host, Url};

/// Transport scheme of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Map a URL scheme, rejecting anything this service does not fetch.
    pub fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn requires_tls(&self) -> bool {
        matches!(self, Scheme::Https)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Error produced when a URL cannot name a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    MissingHost,
}

/// The (host, port, scheme) tuple identifying a remote endpoint.
///
/// `host` is stored without IPv6 brackets so it can be handed straight to
/// the resolver and to TLS server-name parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn from_url(url: &Url) -> Result<Self, PeerError> {
        let scheme = Scheme::from_url_scheme(url.scheme())
            .ok_or_else(|| PeerError::UnsupportedScheme(url.scheme().to_string()))?;
        let host = match url.host() {
            Some(Host::Domain(name)) if !name.is_empty() => name.to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(PeerError::MissingHost),
        };
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self { scheme, host, port })
    }

    /// Value for the `Host` request header.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        write!(f, "{}://{}:{}", self.scheme.as_str(), host, self.port)
    }
}
