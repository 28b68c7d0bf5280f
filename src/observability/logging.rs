//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level from environment or config
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(log_level: &str) -> String {
    format!("request_service={level},request_cli={level},warn", level = log_level)
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
