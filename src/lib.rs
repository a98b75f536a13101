pub mod config;
pub mod error;
pub mod preview;
pub mod rename;
pub mod shell;

pub use config::Settings;
pub use error::{StopmotionError, StopmotionResult};
pub use preview::{StatusSink, Streamer};
pub use rename::AutoRename;
pub use shell::{Failure, FailureKind, Outcome, Registry, Session};
