//! Request lifecycle states and the legal transitions between them.

use crate::request::error::ErrorKind;

/// Where one request is in its lifecycle.
///
/// ```text
/// Pending ─▶ Resolving ─▶ Connecting ─▶ Handshaking ─▶ Sending ─▶ AwaitingHeaders ─▶ StreamingBody ─▶ Completed
///    │                         └──────(plain http)──────▶ ▲  ▲           │
///    └──────────────(idle connection reused)─────────────┘  └─redirect──┘
///
/// Errored and Cancelled are reachable from every non-terminal state.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Resolving,
    Connecting,
    Handshaking,
    Sending,
    AwaitingHeaders,
    StreamingBody,
    Completed,
    Errored(ErrorKind),
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Errored(_) | RequestState::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(&self, next: &RequestState) -> bool {
        use RequestState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Errored(_)) | (_, Cancelled) => true,
            (Pending, Resolving | Sending) => true,
            (Resolving, Connecting) => true,
            (Connecting, Handshaking | Sending) => true,
            (Handshaking, Sending) => true,
            (Sending, AwaitingHeaders) => true,
            // Redirects and stale-connection retries start over on a new transport.
            (Sending | AwaitingHeaders, Resolving | Sending) => true,
            (AwaitingHeaders, StreamingBody) => true,
            (StreamingBody, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Resolving => "resolving",
            RequestState::Connecting => "connecting",
            RequestState::Handshaking => "handshaking",
            RequestState::Sending => "sending",
            RequestState::AwaitingHeaders => "awaiting_headers",
            RequestState::StreamingBody => "streaming_body",
            RequestState::Completed => "completed",
            RequestState::Errored(_) => "errored",
            RequestState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Errored(kind) => write!(f, "errored({})", kind),
            other => f.write_str(other.as_str()),
        }
    }
}
