//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration and trust-root loading.
///
/// Every variant is fatal at startup. At runtime (certificate override) the
/// same errors are logged and the previous trust roots stay in place.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    /// No candidate path yielded a parsable certificate.
    NoTrustRoots(Vec<PathBuf>),
    /// No explicit bundle was given and no default bundle exists.
    NoCertificateBundle(Vec<PathBuf>),
    /// The TLS stack rejected the assembled trust roots.
    Tls(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "IO error reading {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::NoTrustRoots(paths) => {
                write!(f, "No trust roots could be loaded from {}", join_paths(paths))
            }
            ConfigError::NoCertificateBundle(searched) => {
                write!(f, "Don't know how to load certs! Searched {}", join_paths(searched))
            }
            ConfigError::Tls(reason) => write!(f, "TLS configuration rejected: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<no paths>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config: ServiceConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
