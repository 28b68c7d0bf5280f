//! Client session tracking.
//!
//! A session exists from channel accept until the channel closes. Request
//! ids are only meaningful inside their session; every lookup is scoped by
//! [`SessionId`].

pub mod registry;

pub use registry::{ClientSession, Outgoing, SessionError, SessionId, SessionRegistry, CHUNK_CREDITS};
