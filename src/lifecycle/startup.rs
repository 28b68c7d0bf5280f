//! Startup helpers.
//!
//! # Responsibilities
//! - Decide which certificate bundles to load
//! - Optionally hold startup until a debugger attaches
//! - Record the platform registration handle
//!
//! # Design Decisions
//! - Fail fast: a missing trust-root bundle is fatal
//! - Explicit bundle paths are used as given; defaults are tried in order

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ConfigError;

/// Bundle shipped under the resource root.
pub const RESOURCE_BUNDLE: &str = "certs/cacert.pem";

/// Conventional system bundle locations, tried in order.
pub const SYSTEM_BUNDLES: [&str; 3] = [
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/cert.pem",
];

const DEBUGGER_POLL: Duration = Duration::from_millis(250);

/// Pick the certificate bundles to load at startup.
///
/// Explicit paths win. Otherwise the first existing file among the resource
/// root bundle and `system` is used.
pub fn resolve_certificate_paths<S: AsRef<Path>>(
    explicit: &[PathBuf],
    resource_root: Option<&Path>,
    system: &[S],
) -> Result<Vec<PathBuf>, ConfigError> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }

    let mut searched = Vec::new();
    if let Some(root) = resource_root {
        searched.push(root.join(RESOURCE_BUNDLE));
    }
    searched.extend(system.iter().map(|p| p.as_ref().to_path_buf()));

    match searched.iter().find(|p| p.is_file()) {
        Some(found) => {
            tracing::info!(path = %found.display(), "Using default certificate bundle");
            Ok(vec![found.clone()])
        }
        None => Err(ConfigError::NoCertificateBundle(searched)),
    }
}

/// Block until a tracer attaches to this process.
pub async fn wait_for_debugger() {
    let pid = std::process::id();
    if tracer_pid().is_none() {
        tracing::warn!(pid, "Cannot detect debuggers on this platform, continuing");
        return;
    }

    tracing::info!(pid, "Waiting for debugger to attach");
    while tracer_pid() == Some(0) {
        tokio::time::sleep(DEBUGGER_POLL).await;
    }
    tracing::info!(pid, tracer = ?tracer_pid(), "Debugger attached");
}

/// Tracer pid from `/proc/self/status`; `Some(0)` when none is attached.
fn tracer_pid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_tracer_pid(&status)
}

fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Record the name the platform supervisor uses to reach this process.
///
/// The handle is not used for transport here; it is kept for diagnostics.
pub fn register_platform_handle(name: Option<&str>) {
    if let Some(name) = name {
        tracing::info!(server_name = name, "Platform registration handle supplied");
    }
}
