//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, frame limits sane)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServiceConfig;

/// Smallest frame limit that still fits a start message with a modest URL.
pub const MIN_FRAME_BYTES: usize = 4 * 1024;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.socket_path must not be empty")]
    EmptySocketPath,

    #[error("listener.max_frame_bytes must be at least {min} (got {got})")]
    FrameLimitTooSmall { min: usize, got: usize },

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("certificates.paths contains an empty entry at index {0}")]
    EmptyCertificatePath(usize),
}

/// Check a configuration for semantic problems.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(path) = &config.listener.socket_path {
        if path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptySocketPath);
        }
    }

    if config.listener.max_frame_bytes < MIN_FRAME_BYTES {
        errors.push(ValidationError::FrameLimitTooSmall {
            min: MIN_FRAME_BYTES,
            got: config.listener.max_frame_bytes,
        });
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("connect_secs", timeouts.connect_secs),
        ("handshake_secs", timeouts.handshake_secs),
        ("idle_secs", timeouts.idle_secs),
        ("eviction_interval_ms", timeouts.eviction_interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    for (index, path) in config.certificates.paths.iter().enumerate() {
        if path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyCertificatePath(index));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
