//! Trust root management.
//!
//! # Data Flow
//! ```text
//! startup (lifecycle::startup resolves bundle paths)
//!     → store.rs (parse PEM bundles into a root set)
//!     → Arc<CertificateStore> (immutable)
//!     → net::tls (handshake-time chain validation)
//!
//! SetCertificateOverride:
//!     → store.rs loads a fresh store
//!     → event loop swaps it in for new handshakes
//! ```
//!
//! # Design Decisions
//! - A store is never empty: loading fails unless one certificate parses
//! - Unreadable or unparsable bundles are skipped, not fatal, while another path succeeds
//! - Validation is exposed only through `CertificateStore::validate`

pub mod store;

pub use store::{CertificateStore, Validation};
