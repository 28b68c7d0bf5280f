//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Client channels:
//!     listener.rs (Unix socket accept) → service event loop
//!
//! Outbound transports:
//!     pool.rs (idle hit?) ──yes──▶ reuse
//!         │ no
//!         ▼
//!     connector.rs: resolve → connect → tls.rs handshake (https only)
//!         → connection.rs (HTTP/1.1 send handle + driver task)
//!         → borrowed by one request → released back to pool.rs or dropped
//!
//! Connection States:
//!     Establishing → InFlight → Idle → (InFlight | Evicted) → Closed
//! ```
//!
//! # Design Decisions
//! - Peers are keyed by (scheme, host, port); a redirect to another peer never reuses
//! - A connection is moved, not shared, so two requests can never hold it
//! - Dropping a connection is how it is discarded

pub mod connection;
pub mod connector;
pub mod listener;
pub mod peer;
pub mod pool;
pub mod tls;

pub use connection::{Connection, ConnectionId};
pub use connector::{ConnectError, ConnectPhase, Connector};
pub use listener::{ClientListener, ListenerError};
pub use peer::{Peer, Scheme};
pub use pool::{Acquire, ConnectionPool, Pooled, ReleaseOutcome};
