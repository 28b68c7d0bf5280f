//! Service event loop.
//!
//! # Data Flow
//! ```text
//! listener accept / ServiceHandle::attach ─▶ channel.rs (reader + writer tasks)
//!
//! reader task ──Inbound──▶ ┐
//! step futures ──done────▶ ├─▶ event loop ─▶ dispatcher / ServiceState ─▶ session queues ─▶ writer tasks
//! eviction tick ─────────▶ ┘
//! ```
//!
//! # Design Decisions
//! - One task owns all mutable state and handles one input at a time
//! - Helper tasks only move bytes and report back; they never mutate state
//! - Shutdown (signal or client frame) cancels every request and closes
//!   every channel before `run` returns

pub mod channel;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::certs::CertificateStore;
use crate::config::{ConfigError, ServiceConfig};
use crate::net::{ClientListener, ListenerError};
use crate::protocol::dispatcher::{dispatch, Control, Inbound};

pub use channel::ChannelIo;
pub use state::{ServiceState, StepCompletion};

/// Bound on frames waiting for the event loop.
const INBOUND_QUEUE: usize = 1024;

type BoxedChannel = Box<dyn ChannelIo>;

/// The event loop is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("service is not running")]
pub struct ServiceStopped;

/// Cloneable handle for attaching channels from outside the loop.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    attach: mpsc::UnboundedSender<BoxedChannel>,
}

impl ServiceHandle {
    /// Serve a client over an already connected stream.
    pub fn attach<S: ChannelIo>(&self, stream: S) -> Result<(), ServiceStopped> {
        self.attach.send(Box::new(stream)).map_err(|_| ServiceStopped)
    }
}

pub struct Service {
    state: ServiceState,
    inbound: mpsc::Receiver<Inbound>,
    attach_tx: mpsc::UnboundedSender<BoxedChannel>,
    attach_rx: mpsc::UnboundedReceiver<BoxedChannel>,
    config: ServiceConfig,
}

impl Service {
    pub fn new(config: ServiceConfig, store: CertificateStore) -> Result<Self, ConfigError> {
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let state = ServiceState::new(&config, Arc::new(store), inbound_tx)?;

        Ok(Self {
            state,
            inbound,
            attach_tx,
            attach_rx,
            config,
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            attach: self.attach_tx.clone(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run until `shutdown` fires or a client sends a shutdown frame.
    pub async fn run(mut self, listener: Option<ClientListener>, mut shutdown: broadcast::Receiver<()>) {
        let mut eviction = tokio::time::interval(self.config.timeouts.eviction_interval());
        eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            socket = ?listener.as_ref().map(|l| l.path().display().to_string()),
            idle_secs = self.config.timeouts.idle_secs,
            max_redirects = self.config.redirects.max_redirects,
            "Service event loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                Some(stream) = self.attach_rx.recv() => {
                    self.state.accept_channel(stream);
                }
                accepted = accept_next(listener.as_ref()) => match accepted {
                    Ok(stream) => {
                        self.state.accept_channel(stream);
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept client channel"),
                },
                Some(inbound) = self.inbound.recv() => {
                    if dispatch(&mut self.state, inbound) == Control::Shutdown {
                        break;
                    }
                }
                Some(joined) = self.state.steps.join_next(), if !self.state.steps.is_empty() => match joined {
                    Ok(completion) => self.state.complete_step(completion),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!(error = %e, "Request step panicked"),
                },
                _ = eviction.tick() => {
                    self.state.evict_idle(Instant::now());
                }
            }
        }

        self.state.shutdown();
        tracing::info!("Service event loop stopped");
    }
}

async fn accept_next(listener: Option<&ClientListener>) -> Result<UnixStream, ListenerError> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
