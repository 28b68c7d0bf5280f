//! Client protocol subsystem.
//!
//! # Data Flow
//! ```text
//! channel bytes → codec.rs (length prefix + JSON) → messages.rs (ClientMessage)
//!     → dispatcher.rs → service state
//!
//! service state → ServiceEvent → per-session queue → codec.rs → channel bytes
//! ```
//!
//! # Design Decisions
//! - One frame carries exactly one message
//! - Any framing or decoding error closes the offending channel only
//! - Events for one request are queued in transition order

pub mod codec;
pub mod dispatcher;
pub mod messages;

pub use codec::{FrameError, FrameReader, FrameWriter};
pub use dispatcher::{dispatch, Control, Inbound};
pub use messages::{max_chunk_payload, ClientMessage, RequestId, ServiceEvent};
