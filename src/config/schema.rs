//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the request service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Client channel settings (socket path, frame limits).
    pub listener: ListenerConfig,

    /// Trust root bundle locations.
    pub certificates: CertificateConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Redirect-follow policy.
    pub redirects: RedirectConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Local channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Unix domain socket clients connect to. `None` means channels are only
    /// attached in-process.
    pub socket_path: Option<PathBuf>,

    /// Largest inbound frame accepted before the channel is treated as malformed.
    pub max_frame_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Trust root locations.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CertificateConfig {
    /// Ordered list of PEM bundles. Empty means "use the default bundle".
    pub paths: Vec<PathBuf>,

    /// Resource directory searched for `certs/cacert.pem`.
    pub resource_root: Option<PathBuf>,
}

/// Timeout configuration for the request phases and the idle pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on name resolution and on TCP connection establishment, in seconds.
    pub connect_secs: u64,

    /// Bound on the TLS handshake, in seconds.
    pub handshake_secs: u64,

    /// Bound on waiting for the response header block, in seconds (0 disables).
    pub response_secs: u64,

    /// Idle connections older than this are neither reused nor kept, in seconds.
    pub idle_secs: u64,

    /// Period of the idle eviction tick, in milliseconds.
    pub eviction_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            handshake_secs: 30,
            response_secs: 0,
            idle_secs: 60,
            eviction_interval_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn response(&self) -> Option<Duration> {
        (self.response_secs > 0).then(|| Duration::from_secs(self.response_secs))
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

/// Redirect-follow policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Follow 3xx responses that carry a `Location`.
    pub follow: bool,

    /// Redirects followed before the request fails with `too_many_redirects`.
    pub max_redirects: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            follow: true,
            max_redirects: 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
