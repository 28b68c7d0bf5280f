//! Routes decoded client input to service operations.
//!
//! # Responsibilities
//! - Turn each inbound frame into exactly one service operation
//! - Close a channel that sent malformed input, and only that channel
//! - Tell the event loop when a client asked the service to stop

use crate::observability::metrics;
use crate::protocol::codec::FrameError;
use crate::protocol::messages::ClientMessage;
use crate::service::ServiceState;
use crate::session::SessionId;

/// Input reported by a channel reader task.
#[derive(Debug)]
pub enum Inbound {
    Frame(SessionId, ClientMessage),
    /// The client broke framing or sent an undecodable message.
    Malformed(SessionId, FrameError),
    /// The channel ended, cleanly or not.
    Closed(SessionId),
}

impl Inbound {
    pub fn session(&self) -> SessionId {
        match self {
            Inbound::Frame(id, _) | Inbound::Malformed(id, _) | Inbound::Closed(id) => *id,
        }
    }
}

/// What the event loop does after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

pub fn dispatch(state: &mut ServiceState, inbound: Inbound) -> Control {
    let session = inbound.session();
    if !state.has_session(session) {
        // Input queued before the session was closed.
        tracing::trace!(session = %session, "Ignoring input for closed session");
        return Control::Continue;
    }

    match inbound {
        Inbound::Frame(session, message) => handle_message(state, session, message),
        Inbound::Malformed(session, err) => {
            tracing::warn!(session = %session, error = %err, "Malformed frame, closing channel");
            metrics::record_malformed_frame();
            state.close_session(session);
            Control::Continue
        }
        Inbound::Closed(session) => {
            tracing::debug!(session = %session, "Channel closed");
            state.close_session(session);
            Control::Continue
        }
    }
}

fn handle_message(state: &mut ServiceState, session: SessionId, message: ClientMessage) -> Control {
    match message {
        ClientMessage::StartRequest {
            request_id,
            method,
            url,
            headers,
            body,
        } => {
            state.start_request(session, request_id, &method, &url, headers, body);
            Control::Continue
        }
        ClientMessage::CancelRequest { request_id } => {
            state.cancel_request(session, request_id);
            Control::Continue
        }
        ClientMessage::SetCertificateOverride { paths } => {
            state.override_certificates(&paths);
            Control::Continue
        }
        ClientMessage::Shutdown => {
            tracing::info!(session = %session, "Shutdown requested by client");
            Control::Shutdown
        }
    }
}
