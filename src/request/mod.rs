//! Request subsystem.
//!
//! # Responsibilities
//! - Validate start messages into typed requests
//! - Drive each request through its lifecycle (machine.rs, state.rs)
//! - Decide redirect hops (redirect.rs)
//! - Classify failures for the client (error.rs)

pub mod error;
pub mod headers;
pub mod machine;
pub mod redirect;
pub mod state;

pub use error::{ErrorKind, RequestError};
pub use headers::Headers;
pub use machine::{DriveContext, Progress, Request, RequestKey, Step, StepOutput};
pub use redirect::RedirectPolicy;
pub use state::RequestState;
