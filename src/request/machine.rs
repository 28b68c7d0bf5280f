//! Per-request state machine.
//!
//! # Data Flow
//! ```text
//! begin ──▶ idle connection for peer? ──yes──▶ Sending
//!                 │ no
//!                 ▼
//!           Resolving ─▶ Connecting ─▶ Handshaking (https) ─▶ Sending ─▶ AwaitingHeaders
//!                                                                          │
//!                              3xx + Location, policy allows ◀─────────────┤
//!                              (new target, begin again)                   ▼
//!                                                         StreamingBody ─▶ Completed
//! ```
//!
//! # Design Decisions
//! - The machine never awaits. Each transition hands back at most one event
//!   and at most one I/O step; the event loop runs the step and feeds its
//!   output into [`Request::advance`]
//! - A step owns the connection while it runs, so aborting the step closes
//!   the transport and it can never reach the pool
//! - Every scheduled step bumps a sequence number; outputs from an older
//!   step are ignored by the caller
//! - Body reads are paced by the owning session's chunk credits and cut to
//!   the frame limit

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, LOCATION};
use hyper::{Method, Response};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use url::Url;

use crate::config::TimeoutConfig;
use crate::net::connection::ResponseFuture;
use crate::net::connector::{attach_http, attach_tls};
use crate::net::{Acquire, Connection, ConnectionPool, Connector, Peer, ReleaseOutcome};
use crate::observability::metrics;
use crate::protocol::messages::{RequestId, ServiceEvent};
use crate::request::error::{ErrorKind, RequestError};
use crate::request::headers::Headers;
use crate::request::redirect::{Redirect, RedirectAction, RedirectPolicy};
use crate::request::state::RequestState;
use crate::session::{SessionId, CHUNK_CREDITS};

/// One unit of I/O scheduled by the machine.
pub type Step = Pin<Box<dyn Future<Output = StepOutput> + Send>>;

/// What a finished step produced.
pub enum StepOutput {
    Resolved(Vec<SocketAddr>),
    /// TCP is up and a TLS handshake is next.
    Connected(TcpStream),
    Established(Connection),
    Dispatched(Connection, ResponseFuture),
    Headers(Connection, Response<Incoming>),
    /// `chunk` is `None` once the body ended cleanly.
    BodyChunk {
        stream: BodyStream,
        chunk: Option<Bytes>,
        credit: OwnedSemaphorePermit,
    },
    Failed(RequestError),
}

impl std::fmt::Debug for StepOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutput::Resolved(addrs) => f.debug_tuple("Resolved").field(addrs).finish(),
            StepOutput::Connected(_) => f.write_str("Connected"),
            StepOutput::Established(conn) => f.debug_tuple("Established").field(&conn.id()).finish(),
            StepOutput::Dispatched(conn, _) => f.debug_tuple("Dispatched").field(&conn.id()).finish(),
            StepOutput::Headers(conn, response) => {
                f.debug_tuple("Headers").field(&conn.id()).field(&response.status()).finish()
            }
            StepOutput::BodyChunk { stream, chunk, .. } => f
                .debug_struct("BodyChunk")
                .field("conn", &stream.conn.id())
                .field("len", &chunk.as_ref().map(Bytes::len))
                .finish(),
            StepOutput::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Globally unique request identity: the owning session plus its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub session: SessionId,
    pub request_id: RequestId,
}

impl RequestKey {
    pub fn new(session: SessionId, request_id: RequestId) -> Self {
        Self { session, request_id }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/req-{}", self.session, self.request_id)
    }
}

/// Shared resources a transition may touch.
pub struct DriveContext<'a> {
    pub pool: &'a mut ConnectionPool,
    pub connector: &'a Connector,
    pub policy: &'a RedirectPolicy,
    pub timeouts: &'a TimeoutConfig,
    /// Largest body piece one `DataChunk` event may carry.
    pub max_chunk: usize,
    pub now: Instant,
}

/// Result of one transition.
#[derive(Default)]
pub struct Progress {
    pub event: Option<ServiceEvent>,
    pub next: Option<Step>,
    /// Held by a `DataChunk` event until it has been written.
    pub credit: Option<OwnedSemaphorePermit>,
}

impl Progress {
    fn emit(event: ServiceEvent) -> Self {
        Self { event: Some(event), ..Self::default() }
    }

    fn with_event(mut self, event: ServiceEvent) -> Self {
        self.event = Some(event);
        self
    }
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// A response body relayed to the client in pieces of at most `max_chunk` bytes.
pub struct BodyStream {
    conn: Connection,
    body: Incoming,
    pending: Bytes,
    max_chunk: usize,
}

impl BodyStream {
    fn new(conn: Connection, body: Incoming, max_chunk: usize) -> Self {
        Self {
            conn,
            body,
            pending: Bytes::new(),
            max_chunk: max_chunk.max(1),
        }
    }

    /// Next non-empty piece of the body, or `None` once it ended cleanly.
    async fn next(&mut self) -> Result<Option<Bytes>, RequestError> {
        loop {
            if !self.pending.is_empty() {
                let take = self.pending.len().min(self.max_chunk);
                return Ok(Some(self.pending.split_to(take)));
            }
            match self.body.frame().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(RequestError::transport(format!("reading body: {}", e))),
                // Trailers are not reported.
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.pending = data;
                    }
                }
            }
        }
    }
}

/// Wait for a chunk credit, then read the next piece of the body.
///
/// Without a credit the body is not polled, so a client that stops reading
/// stalls the origin instead of growing its queue.
async fn read_chunk(mut stream: BodyStream, credits: Arc<Semaphore>) -> StepOutput {
    let credit = match credits.acquire_owned().await {
        Ok(credit) => credit,
        Err(_) => return StepOutput::Failed(RequestError::transport("client channel closed")),
    };
    match stream.next().await {
        Ok(chunk) => StepOutput::BodyChunk { stream, chunk, credit },
        Err(err) => StepOutput::Failed(err),
    }
}

/// One logical request from submission to a terminal state.
#[derive(Debug)]
pub struct Request {
    key: RequestKey,
    method: Method,
    url: Url,
    peer: Peer,
    headers: Headers,
    body: Option<Bytes>,
    state: RequestState,
    seq: u64,
    redirects: u32,
    reused: bool,
    retried: bool,
    in_flight: Option<AbortHandle>,
    credits: Arc<Semaphore>,
    started: Instant,
}

impl Request {
    /// Validate a start message into a pending request.
    pub fn new(
        key: RequestKey,
        method: &str,
        url: &str,
        headers: Headers,
        body: Option<Bytes>,
    ) -> Result<Self, RequestError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| RequestError::invalid(format!("invalid method '{}'", method)))?;
        let url = Url::parse(url).map_err(|e| RequestError::invalid(format!("invalid url '{}': {}", url, e)))?;
        let peer = Peer::from_url(&url).map_err(RequestError::invalid)?;

        for (name, value) in headers.iter() {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RequestError::invalid(format!("invalid header name '{}'", name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| RequestError::invalid(format!("invalid value for header '{}'", name)))?;
        }

        Ok(Self {
            key,
            method,
            url,
            peer,
            headers,
            body,
            state: RequestState::Pending,
            seq: 0,
            redirects: 0,
            reused: false,
            retried: false,
            in_flight: None,
            credits: Arc::new(Semaphore::new(CHUNK_CREDITS)),
            started: Instant::now(),
        })
    }

    /// Draw body chunk credits from the owning session.
    pub fn with_credits(mut self, credits: Arc<Semaphore>) -> Self {
        self.credits = credits;
        self
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// Sequence number of the most recently scheduled step.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether an output tagged `seq` belongs to the step this request is waiting on.
    pub fn accepts(&self, seq: u64) -> bool {
        !self.state.is_terminal() && seq == self.seq
    }

    /// Remember how to abort the step now running.
    pub fn track(&mut self, handle: AbortHandle) {
        self.in_flight = Some(handle);
    }

    /// Start the first exchange.
    pub fn begin(&mut self, cx: &mut DriveContext<'_>) -> Progress {
        tracing::debug!(request = %self.key, method = %self.method, url = %self.url, "Request started");
        metrics::record_request_started();
        self.start_exchange(cx, true)
    }

    /// Feed the output of the last scheduled step into the machine.
    pub fn advance(&mut self, output: StepOutput, cx: &mut DriveContext<'_>) -> Progress {
        self.in_flight = None;
        match output {
            StepOutput::Resolved(addrs) => self.on_resolved(addrs, cx),
            StepOutput::Connected(tcp) => self.on_connected(tcp, cx),
            StepOutput::Established(conn) => {
                metrics::record_connection_created(conn.peer().scheme.as_str());
                self.send(conn, cx)
            }
            StepOutput::Dispatched(conn, response) => self.await_headers(conn, response, cx),
            StepOutput::Headers(conn, response) => self.on_headers(conn, response, cx),
            StepOutput::BodyChunk { stream, chunk: Some(bytes), credit } => {
                let event = ServiceEvent::DataChunk { request_id: self.key.request_id, bytes };
                let mut progress = self.schedule(read_chunk(stream, self.credits.clone())).with_event(event);
                progress.credit = Some(credit);
                progress
            }
            StepOutput::BodyChunk { stream, chunk: None, .. } => self.complete(stream.conn, cx),
            StepOutput::Failed(err) => self.on_failure(err, cx),
        }
    }

    /// Client-initiated cancellation. The running step is aborted and any
    /// connection it held is dropped. Emits nothing.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(step) = self.in_flight.take() {
            step.abort();
        }
        tracing::debug!(request = %self.key, state = %self.state, "Request cancelled");
        self.transition(RequestState::Cancelled);
        metrics::record_request_outcome("cancelled");
    }

    fn transition(&mut self, next: RequestState) {
        if !self.state.can_transition_to(&next) {
            tracing::error!(request = %self.key, from = %self.state, to = %next, "Illegal request transition");
        }
        tracing::trace!(request = %self.key, from = %self.state, to = %next, "Request state");
        self.state = next;
    }

    fn schedule<F>(&mut self, step: F) -> Progress
    where
        F: Future<Output = StepOutput> + Send + 'static,
    {
        self.seq += 1;
        Progress {
            next: Some(Box::pin(step)),
            ..Progress::default()
        }
    }

    fn start_exchange(&mut self, cx: &mut DriveContext<'_>, allow_reuse: bool) -> Progress {
        if allow_reuse {
            if let Acquire::Reused(conn) = cx.pool.acquire(&self.peer, cx.now) {
                self.reused = true;
                return self.send(conn, cx);
            }
        }

        self.reused = false;
        self.transition(RequestState::Resolving);
        let resolve = cx.connector.resolve(&self.peer);
        self.schedule(async move {
            match resolve.await {
                Ok(addrs) => StepOutput::Resolved(addrs),
                Err(e) => StepOutput::Failed(e.into()),
            }
        })
    }

    fn on_resolved(&mut self, addrs: Vec<SocketAddr>, cx: &mut DriveContext<'_>) -> Progress {
        self.transition(RequestState::Connecting);
        let connect = cx.connector.connect(&self.peer, addrs);
        let peer = self.peer.clone();

        self.schedule(async move {
            let tcp = match connect.await {
                Ok(tcp) => tcp,
                Err(e) => return StepOutput::Failed(e.into()),
            };
            if peer.scheme.requires_tls() {
                return StepOutput::Connected(tcp);
            }
            match attach_http(peer, tcp, None).await {
                Ok(conn) => StepOutput::Established(conn),
                Err(e) => StepOutput::Failed(e.into()),
            }
        })
    }

    fn on_connected(&mut self, tcp: TcpStream, cx: &mut DriveContext<'_>) -> Progress {
        self.transition(RequestState::Handshaking);
        let handshake = cx.connector.handshake(&self.peer, tcp);
        let peer = self.peer.clone();

        self.schedule(async move {
            let stream = match handshake.await {
                Ok(stream) => stream,
                Err(e) => return StepOutput::Failed(e.into()),
            };
            match attach_tls(peer, stream).await {
                Ok(conn) => StepOutput::Established(conn),
                Err(e) => StepOutput::Failed(e.into()),
            }
        })
    }

    /// Build the outgoing message for the current hop.
    fn build(&self) -> Result<hyper::Request<Full<Bytes>>, RequestError> {
        let target = match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        };

        let mut builder = hyper::Request::builder()
            .method(self.method.clone())
            .uri(target)
            .header(HOST, self.peer.authority());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case(HOST.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }

        let body = self.body.clone().unwrap_or_default();
        builder.body(Full::new(body)).map_err(RequestError::invalid)
    }

    fn send(&mut self, conn: Connection, cx: &mut DriveContext<'_>) -> Progress {
        self.transition(RequestState::Sending);
        let request = match self.build() {
            Ok(request) => request,
            Err(err) => {
                cx.pool.release(conn, ReleaseOutcome::Clean, cx.now);
                return self.fail(err);
            }
        };
        tracing::trace!(request = %self.key, connection_id = %conn.id(), reused = self.reused, "Sending request");

        self.schedule(async move {
            let mut conn = conn;
            if let Err(e) = conn.ready().await {
                return StepOutput::Failed(RequestError::transport(format!("connection unusable: {}", e)));
            }
            let response = conn.dispatch(request);
            StepOutput::Dispatched(conn, response)
        })
    }

    fn await_headers(&mut self, conn: Connection, response: ResponseFuture, cx: &mut DriveContext<'_>) -> Progress {
        self.transition(RequestState::AwaitingHeaders);
        let limit = cx.timeouts.response();

        self.schedule(async move {
            let outcome = match limit {
                Some(limit) => match tokio::time::timeout(limit, response).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return StepOutput::Failed(RequestError::new(
                            ErrorKind::Timeout,
                            format!("no response headers within {:?}", limit),
                        ))
                    }
                },
                None => response.await,
            };
            match outcome {
                Ok(response) => StepOutput::Headers(conn, response),
                Err(e) => StepOutput::Failed(RequestError::transport(e)),
            }
        })
    }

    fn on_headers(&mut self, conn: Connection, response: Response<Incoming>, cx: &mut DriveContext<'_>) -> Progress {
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match cx
            .policy
            .evaluate(&self.method, &self.url, status, location.as_deref(), self.redirects)
        {
            Err(err) => self.fail(err),
            Ok(RedirectAction::Follow(redirect)) => self.follow(redirect, conn, response, cx),
            Ok(RedirectAction::Deliver) => {
                let mut conn = conn;
                if wants_close(response.headers()) {
                    conn.mark_unreusable();
                }
                let headers = Headers::from_header_map(response.headers());
                tracing::debug!(
                    request = %self.key,
                    status = status.as_u16(),
                    redirects = self.redirects,
                    "Response headers received"
                );

                self.transition(RequestState::StreamingBody);
                let event = ServiceEvent::HeadersAvailable {
                    request_id: self.key.request_id,
                    status: status.as_u16(),
                    headers,
                };
                let stream = BodyStream::new(conn, response.into_body(), cx.max_chunk);
                self.schedule(read_chunk(stream, self.credits.clone())).with_event(event)
            }
        }
    }

    fn follow(
        &mut self,
        redirect: Redirect,
        conn: Connection,
        response: Response<Incoming>,
        cx: &mut DriveContext<'_>,
    ) -> Progress {
        // A redirect body still on the wire would corrupt the next exchange.
        let outcome = if response.body().is_end_stream() && !wants_close(response.headers()) {
            ReleaseOutcome::Clean
        } else {
            ReleaseOutcome::Dirty
        };
        drop(response);
        cx.pool.release(conn, outcome, cx.now);

        let peer = match Peer::from_url(&redirect.url) {
            Ok(peer) => peer,
            Err(e) => return self.fail(RequestError::invalid(e)),
        };

        tracing::debug!(
            request = %self.key,
            from = %self.url,
            to = %redirect.url,
            hop = self.redirects + 1,
            "Following redirect"
        );

        redirect.apply_to(&mut self.headers);
        if redirect.drop_body {
            self.body = None;
        }
        self.method = redirect.method;
        self.url = redirect.url;
        self.peer = peer;
        self.redirects += 1;
        self.retried = false;

        self.start_exchange(cx, true)
    }

    fn complete(&mut self, conn: Connection, cx: &mut DriveContext<'_>) -> Progress {
        self.transition(RequestState::Completed);
        let connection_id = conn.id();
        let served = conn.requests_served();
        let pooled = cx.pool.release(conn, ReleaseOutcome::Clean, cx.now);
        metrics::record_request_outcome("completed");
        tracing::debug!(
            request = %self.key,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            %connection_id,
            served,
            pooled,
            "Request completed"
        );
        Progress::emit(ServiceEvent::RequestComplete { request_id: self.key.request_id })
    }

    fn should_retry(&self, err: &RequestError) -> bool {
        err.kind == ErrorKind::Transport
            && self.reused
            && !self.retried
            && matches!(self.state, RequestState::Sending | RequestState::AwaitingHeaders)
            && self.method.is_idempotent()
    }

    fn on_failure(&mut self, err: RequestError, cx: &mut DriveContext<'_>) -> Progress {
        if self.should_retry(&err) {
            self.retried = true;
            tracing::debug!(request = %self.key, error = %err, "Reused connection failed, retrying on a new one");
            return self.start_exchange(cx, false);
        }
        self.fail(err)
    }

    fn fail(&mut self, err: RequestError) -> Progress {
        self.transition(RequestState::Errored(err.kind));
        metrics::record_request_outcome("failed");
        metrics::record_request_failure(err.kind.as_str());
        tracing::info!(request = %self.key, kind = %err.kind, detail = %err.detail, "Request failed");
        Progress::emit(ServiceEvent::RequestFailed {
            request_id: self.key.request_id,
            error_kind: err.kind,
            detail: err.detail,
        })
    }
}
