//! Connected client sessions and the requests each one owns.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;

use crate::observability::metrics;
use crate::protocol::messages::{RequestId, ServiceEvent};

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Body chunks a session may have queued but not yet written.
pub const CHUNK_CREDITS: usize = 16;

/// Identity of one connected client channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{0} is not connected")]
    NotFound(SessionId),
}

/// An event waiting for the channel writer.
///
/// A body chunk carries one of its session's credits, returned once the
/// writer is done with it.
#[derive(Debug)]
pub struct Outgoing {
    pub event: ServiceEvent,
    credit: Option<OwnedSemaphorePermit>,
}

/// One connected client and the requests it owns.
///
/// Events go out through `outbound`; dropping the session drops the sender,
/// which ends the channel's writer task. Only body chunks are gated by
/// `credits`, so the queue holds at most [`CHUNK_CREDITS`] chunks plus the
/// headers and terminal event of each live request.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Outgoing>,
    credits: Arc<Semaphore>,
    requests: HashSet<RequestId>,
    reader: Option<AbortHandle>,
}

impl ClientSession {
    pub fn new(id: SessionId, outbound: mpsc::UnboundedSender<Outgoing>, reader: Option<AbortHandle>) -> Self {
        Self {
            id,
            outbound,
            credits: Arc::new(Semaphore::new(CHUNK_CREDITS)),
            requests: HashSet::new(),
            reader,
        }
    }

    /// Credits a body read must hold before it may produce a chunk.
    pub fn credits(&self) -> Arc<Semaphore> {
        self.credits.clone()
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owns(&self, request_id: RequestId) -> bool {
        self.requests.contains(&request_id)
    }

    /// Record a new live request. Returns `false` if the id is already live.
    pub fn claim(&mut self, request_id: RequestId) -> bool {
        self.requests.insert(request_id)
    }

    pub fn release(&mut self, request_id: RequestId) -> bool {
        self.requests.remove(&request_id)
    }

    pub fn requests(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.requests.iter().copied()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Queue an event for the client. A closed channel is not an error here;
    /// the reader side reports the close.
    pub fn send(&self, event: ServiceEvent) {
        self.queue(Outgoing { event, credit: None });
    }

    /// Queue a body chunk together with the credit its read acquired.
    pub fn send_chunk(&self, event: ServiceEvent, credit: OwnedSemaphorePermit) {
        self.queue(Outgoing { event, credit: Some(credit) });
    }

    fn queue(&self, outgoing: Outgoing) {
        if self.outbound.send(outgoing).is_err() {
            tracing::trace!(session = %self.id, "Dropped event for closed channel");
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Every connected session, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, session: ClientSession) {
        let id = session.id();
        self.sessions.insert(id, session);
        metrics::record_active_sessions(self.sessions.len());
        tracing::debug!(session = %id, active = self.sessions.len(), "Session registered");
    }

    /// Remove a session and hand it back so the caller can cancel what it owned.
    pub fn unregister(&mut self, id: SessionId) -> Result<ClientSession, SessionError> {
        let session = self.sessions.remove(&id).ok_or(SessionError::NotFound(id))?;
        metrics::record_active_sessions(self.sessions.len());
        tracing::debug!(session = %id, owned = session.request_count(), "Session unregistered");
        Ok(session)
    }

    pub fn lookup(&self, id: SessionId) -> Result<&ClientSession, SessionError> {
        self.sessions.get(&id).ok_or(SessionError::NotFound(id))
    }

    pub fn lookup_mut(&mut self, id: SessionId) -> Result<&mut ClientSession, SessionError> {
        self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
