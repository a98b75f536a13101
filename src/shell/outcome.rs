//! Result state machine for a shell session.
//!
//! Every session holds exactly one current `Outcome`. Only the session's
//! actor task writes it, and `Closed` is absorbing.

use std::fmt;

use crate::error::ReadError;

/// Why a command (or the bootstrap) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The tool printed an error marker
    Reported,
    /// No prompt appeared before the deadline
    TimedOut,
    /// The tool's output stream closed
    ProcessExited,
    /// Writing to or reading from the tool failed
    Io,
    /// The caller's action panicked while holding the session
    Panicked,
}

/// A failed command, with the cleaned message when one is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: Option<String>,
}

impl Failure {
    pub fn reported(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Reported,
            message: Some(message.into()),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            kind: FailureKind::TimedOut,
            message: None,
        }
    }

    pub fn process_exited() -> Self {
        Self {
            kind: FailureKind::ProcessExited,
            message: None,
        }
    }

    pub fn io(err: &std::io::Error) -> Self {
        Self {
            kind: FailureKind::Io,
            message: Some(err.to_string()),
        }
    }

    pub fn panicked(message: Option<String>) -> Self {
        Self {
            kind: FailureKind::Panicked,
            message,
        }
    }
}

impl From<ReadError> for Failure {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::TimedOut => Failure::timed_out(),
            ReadError::Eof => Failure::process_exited(),
            ReadError::Io(e) => Failure::io(&e),
        }
    }
}

/// Current state of a session, and the value every operation returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Idle, no command in flight
    #[default]
    Ready,
    /// Last command completed; holds the cleaned response payload
    Success(String),
    /// Last command (or the bootstrap) failed
    Error(Failure),
    /// Automatic continuation was cancelled; the session stays open
    Interrupted,
    /// Terminal: the process is gone and nothing else is accepted
    Closed,
}

impl Outcome {
    /// Shorthand for a failure reported by the tool itself.
    pub fn reported(message: impl Into<String>) -> Self {
        Outcome::Error(Failure::reported(message))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Outcome::Closed)
    }

    /// `Ready` or `Success`: the session can take another command.
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready | Outcome::Success(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Outcome::Interrupted)
    }

    /// The failure, if this outcome is an error.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Error(failure) => Some(failure),
            _ => None,
        }
    }

    /// The error message, if this outcome is an error that carries one.
    pub fn error_message(&self) -> Option<&str> {
        self.failure().and_then(|f| f.message.as_deref())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready => write!(f, "ready"),
            Outcome::Success(text) => write!(f, "{}", text),
            Outcome::Error(Failure {
                message: Some(message),
                ..
            }) => write!(f, "{}", message),
            Outcome::Error(Failure {
                kind,
                message: None,
            }) => write!(f, "error ({:?})", kind),
            Outcome::Interrupted => write!(f, "interrupted"),
            Outcome::Closed => write!(f, "closed"),
        }
    }
}
