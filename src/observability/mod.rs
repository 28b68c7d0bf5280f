//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stderr log stream (collected by the process supervisor)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Session, request and connection ids flow through as span-less fields
//! - Metrics are cheap (atomic increments)
//! - Nothing here is required for correctness; the service runs with both disabled

pub mod logging;
pub mod metrics;
