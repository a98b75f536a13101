//! Error handling types for stopmotion
//!
//! Session-level failures are never errors in this sense: they are reported
//! as `Outcome::Error` values. The types here cover setup problems (spawning
//! the tool, bad configuration, a closed action queue) and the internal
//! read failures that get folded into outcomes.

use thiserror::Error;

/// Error type for registry, configuration and watcher operations
#[derive(Debug, Error)]
pub enum StopmotionError {
    /// The external tool could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The configured prompt tag does not produce a valid pattern
    #[error("Invalid prompt pattern: {0}")]
    InvalidPrompt(#[from] regex::Error),

    /// The session's action queue no longer accepts work
    #[error("Session for {key} rejected the action: queue closed")]
    Rejected { key: String },

    /// No tokio runtime to run session actors on
    #[error("No async runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Filesystem watcher error
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for stopmotion operations
pub type StopmotionResult<T> = Result<T, StopmotionError>;

impl StopmotionError {
    /// Create a spawn error
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        StopmotionError::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a rejected error
    pub fn rejected(key: impl Into<String>) -> Self {
        StopmotionError::Rejected { key: key.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        StopmotionError::Config {
            message: message.into(),
        }
    }
}

/// Why a stream read stopped before producing data.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The deadline passed before any data arrived
    #[error("read timed out")]
    TimedOut,

    /// The stream was closed by the other side
    #[error("stream closed")]
    Eof,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}
