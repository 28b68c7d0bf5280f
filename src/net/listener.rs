//! Local channel listener.
//!
//! # Responsibilities
//! - Bind the Unix domain socket clients connect to
//! - Accept incoming client channels
//! - Remove the socket file on bind (stale) and on drop

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to the socket path.
    Bind(PathBuf, io::Error),
    /// Failed to accept a channel.
    Accept(io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(path, e) => write!(f, "Failed to bind {}: {}", path.display(), e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Listening endpoint for client channels.
#[derive(Debug)]
pub struct ClientListener {
    inner: UnixListener,
    path: PathBuf,
}

impl ClientListener {
    /// Bind to `path`, replacing a socket left behind by a previous run.
    pub fn bind(path: &Path) -> Result<Self, ListenerError> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ListenerError::Bind(path.to_path_buf(), e)),
        }

        let inner = UnixListener::bind(path).map_err(|e| ListenerError::Bind(path.to_path_buf(), e))?;

        tracing::info!(path = %path.display(), "Listener bound");

        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Accept the next client channel.
    pub async fn accept(&self) -> Result<UnixStream, ListenerError> {
        let (stream, _) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(path = %self.path.display(), "Channel accepted");
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClientListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
