//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → command-line overlay (main.rs)
//!     → ServiceConfig (validated, immutable)
//!     → owned by the service event loop
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the trust roots can be replaced at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::CertificateConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::RedirectConfig;
pub use schema::ServiceConfig;
pub use schema::TimeoutConfig;
