//! State owned by the event loop.
//!
//! # Responsibilities
//! - Hold every live request, session and idle connection
//! - Apply one operation or one step completion at a time
//! - Route events to the session that owns the request
//!
//! # Design Decisions
//! - Only the event loop task holds `&mut ServiceState`; no locks
//! - Requests are keyed by (session, request id), so ids never collide
//!   across sessions
//! - A terminal request is removed in the same call that emitted its
//!   final event

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::certs::CertificateStore;
use crate::config::{ConfigError, ServiceConfig, TimeoutConfig};
use crate::net::{ConnectionPool, Connector};
use crate::observability::metrics;
use crate::protocol::dispatcher::Inbound;
use crate::protocol::messages::{max_chunk_payload, RequestId, ServiceEvent};
use crate::request::{DriveContext, Headers, Progress, RedirectPolicy, Request, RequestKey, StepOutput};
use crate::service::channel::{self, ChannelIo};
use crate::session::{SessionId, SessionRegistry};

/// Output of one request step, tagged with the step it belongs to.
#[derive(Debug)]
pub struct StepCompletion {
    pub key: RequestKey,
    pub seq: u64,
    pub output: StepOutput,
}

/// Resources request transitions draw on.
#[derive(Debug)]
struct Engine {
    pool: ConnectionPool,
    connector: Connector,
    policy: RedirectPolicy,
    timeouts: TimeoutConfig,
    max_chunk: usize,
}

impl Engine {
    fn cx(&mut self) -> DriveContext<'_> {
        DriveContext {
            pool: &mut self.pool,
            connector: &self.connector,
            policy: &self.policy,
            timeouts: &self.timeouts,
            max_chunk: self.max_chunk,
            now: Instant::now(),
        }
    }
}

pub struct ServiceState {
    engine: Engine,
    sessions: SessionRegistry,
    requests: HashMap<RequestKey, Request>,
    pub(crate) steps: JoinSet<StepCompletion>,
    inbound: mpsc::Sender<Inbound>,
    max_frame_bytes: usize,
}

impl ServiceState {
    pub fn new(config: &ServiceConfig, store: Arc<CertificateStore>, inbound: mpsc::Sender<Inbound>) -> Result<Self, ConfigError> {
        let connector = Connector::new(store, &config.timeouts)?;
        Ok(Self {
            engine: Engine {
                pool: ConnectionPool::new(config.timeouts.idle()),
                connector,
                policy: RedirectPolicy::from(&config.redirects),
                timeouts: config.timeouts.clone(),
                max_chunk: max_chunk_payload(config.listener.max_frame_bytes),
            },
            sessions: SessionRegistry::new(),
            requests: HashMap::new(),
            steps: JoinSet::new(),
            inbound,
            max_frame_bytes: config.listener.max_frame_bytes,
        })
    }

    /// Start serving a newly connected client.
    pub fn accept_channel<S: ChannelIo>(&mut self, stream: S) -> SessionId {
        let session = channel::open(stream, self.max_frame_bytes, self.inbound.clone());
        let id = session.id();
        self.sessions.register(session);
        tracing::info!(session = %id, active = self.sessions.len(), "Client connected");
        id
    }

    pub fn has_session(&self, id: SessionId) -> bool {
        self.sessions.lookup(id).is_ok()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn idle_connections(&self) -> usize {
        self.engine.pool.idle_count()
    }

    pub fn start_request(
        &mut self,
        session_id: SessionId,
        request_id: RequestId,
        method: &str,
        url: &str,
        headers: Headers,
        body: Option<Bytes>,
    ) {
        let Ok(session) = self.sessions.lookup_mut(session_id) else {
            return;
        };
        if session.owns(request_id) {
            tracing::warn!(session = %session_id, request_id = %request_id, "Duplicate live request id, closing channel");
            self.close_session(session_id);
            return;
        }

        let key = RequestKey::new(session_id, request_id);
        let mut request = match Request::new(key, method, url, headers, body) {
            Ok(request) => request.with_credits(session.credits()),
            Err(err) => {
                tracing::info!(request = %key, detail = %err.detail, "Rejected invalid request");
                metrics::record_request_outcome("failed");
                metrics::record_request_failure(err.kind.as_str());
                session.send(ServiceEvent::RequestFailed {
                    request_id,
                    error_kind: err.kind,
                    detail: err.detail,
                });
                return;
            }
        };

        session.claim(request_id);
        let progress = request.begin(&mut self.engine.cx());
        self.requests.insert(key, request);
        self.apply(key, progress);
    }

    /// Cancel a live request. Unknown ids are ignored.
    pub fn cancel_request(&mut self, session_id: SessionId, request_id: RequestId) {
        let key = RequestKey::new(session_id, request_id);
        match self.requests.remove(&key) {
            Some(mut request) => {
                request.cancel();
                if let Ok(session) = self.sessions.lookup_mut(session_id) {
                    session.release(request_id);
                }
            }
            None => tracing::trace!(request = %key, "Cancel for unknown request"),
        }
    }

    /// Replace the trust roots used by future handshakes.
    ///
    /// On failure the current roots stay in effect.
    pub fn override_certificates(&mut self, paths: &[PathBuf]) {
        let replaced = CertificateStore::load(paths)
            .and_then(|store| Connector::new(Arc::new(store), &self.engine.timeouts));

        match replaced {
            Ok(connector) => {
                let roots = connector.store().len();
                self.engine.connector = connector;
                // Idle TLS connections were validated against the old roots.
                let flushed = self.engine.pool.discard_where(|peer| peer.scheme.requires_tls());
                tracing::info!(roots, flushed, "Certificate override applied");
            }
            Err(e) => tracing::warn!(error = %e, "Certificate override rejected, keeping current roots"),
        }
    }

    /// Drop a session and cancel every request it owns.
    pub fn close_session(&mut self, session_id: SessionId) {
        let Ok(session) = self.sessions.unregister(session_id) else {
            return;
        };

        let mut cancelled = 0usize;
        for request_id in session.requests() {
            if let Some(mut request) = self.requests.remove(&RequestKey::new(session_id, request_id)) {
                request.cancel();
                cancelled += 1;
            }
        }
        tracing::info!(session = %session_id, cancelled, active = self.sessions.len(), "Client disconnected");
    }

    /// Feed a finished step back into its request.
    pub fn complete_step(&mut self, completion: StepCompletion) {
        let StepCompletion { key, seq, output } = completion;
        let Some(request) = self.requests.get_mut(&key) else {
            tracing::trace!(request = %key, "Step finished for a request that is gone");
            return;
        };
        if !request.accepts(seq) {
            tracing::trace!(request = %key, seq, current = request.seq(), "Ignoring stale step");
            return;
        }

        let progress = request.advance(output, &mut self.engine.cx());
        self.apply(key, progress);
    }

    /// Deliver a transition's event and schedule its next step.
    fn apply(&mut self, key: RequestKey, progress: Progress) {
        let Progress { event, next, credit } = progress;
        if let Some(event) = event {
            if let Ok(session) = self.sessions.lookup(key.session) {
                match credit {
                    Some(credit) => session.send_chunk(event, credit),
                    None => session.send(event),
                }
            }
        }

        let Some(request) = self.requests.get_mut(&key) else {
            return;
        };
        match next {
            Some(step) => {
                let seq = request.seq();
                let handle = self.steps.spawn(async move {
                    let output = step.await;
                    StepCompletion { key, seq, output }
                });
                request.track(handle);
            }
            None if request.state().is_terminal() => self.finish(key),
            None => tracing::error!(request = %key, state = %request.state(), "Request stalled without a step"),
        }
    }

    fn finish(&mut self, key: RequestKey) {
        self.requests.remove(&key);
        if let Ok(session) = self.sessions.lookup_mut(key.session) {
            session.release(key.request_id);
        }
    }

    pub fn evict_idle(&mut self, now: Instant) -> usize {
        self.engine.pool.evict_idle(now)
    }

    /// Cancel everything and close every channel.
    pub fn shutdown(&mut self) {
        let requests = self.requests.len();
        for (_, mut request) in self.requests.drain() {
            request.cancel();
        }
        for id in self.sessions.ids() {
            self.close_session(id);
        }
        self.steps.abort_all();
        let idle = self.engine.pool.clear();
        tracing::info!(requests, idle, "Service state torn down");
    }
}
