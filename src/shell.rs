//! Client for a prompt-driven interactive shell such as `gphoto2 --shell`.
//!
//! - [`protocol`]: prompt and error-marker framing
//! - [`burst`]: best-effort stream reads
//! - [`race`]: first-of-N future race used at startup
//! - [`session`]: one running tool and its state
//! - [`registry`]: per-key actors that serialize work on each session

pub(crate) mod burst;
pub mod outcome;
pub mod protocol;
pub mod race;
pub mod registry;
pub mod session;

pub use outcome::{Failure, FailureKind, Outcome};
pub use protocol::Protocol;
pub use registry::{Action, Registry};
pub use session::Session;
