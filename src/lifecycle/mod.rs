//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Resolve certificate bundles → Load trust roots → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Event loop cancels requests → Channels closed → Pool dropped → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then trust roots, then the listener
//! - A client shutdown frame and an OS signal take the same path

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
