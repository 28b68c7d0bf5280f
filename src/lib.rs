//! Sandboxed network request service.
//!
//! Performs DNS resolution, TCP connects, TLS handshakes and HTTP/1.1
//! exchanges on behalf of untrusted client processes, which talk to it over
//! a framed local channel.

// Core subsystems
pub mod certs;
pub mod config;
pub mod net;
pub mod request;

// Client boundary
pub mod client;
pub mod protocol;
pub mod service;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use certs::CertificateStore;
pub use client::ServiceClient;
pub use config::ServiceConfig;
pub use lifecycle::Shutdown;
pub use service::{Service, ServiceHandle};
