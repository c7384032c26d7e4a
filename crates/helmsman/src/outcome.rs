//! Structured results returned at every operation boundary.
//!
//! Operations never surface an unhandled error to the front end: they return
//! either a success carrying the text to show, or a [`Failure`] carrying a
//! [`FailureKind`] and a human-readable reason.

use thiserror::Error;

use crate::driver::DriverError;

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The caller, command or path was rejected by policy.
    PolicyDenied,
    /// The multiplexer or assistant binary is not installed.
    ToolMissing,
    /// A multiplexer or assistant call exceeded its timeout.
    ToolTimeout,
    /// Anything else; details are in the logs.
    Unexpected,
}

/// A failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub message: String,
}

impl Failure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A policy denial.
    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::new(FailureKind::PolicyDenied, message)
    }

    /// An unexpected failure.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unexpected, message)
    }
}

impl From<&DriverError> for Failure {
    fn from(err: &DriverError) -> Self {
        match err {
            DriverError::ToolMissing { program } => Self::new(
                FailureKind::ToolMissing,
                format!("{program} is not installed or not on PATH"),
            ),
            DriverError::Timeout { operation, after } => Self::new(
                FailureKind::ToolTimeout,
                format!("{operation} timed out after {after:?}"),
            ),
            DriverError::NoAlternateScreen | DriverError::Command { .. } | DriverError::Io(_) => {
                Self::unexpected(format!("session control failed: {err}"))
            }
        }
    }
}

/// The result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded.
    Success {
        /// Text to show to the caller.
        message: String,
        /// True when no new reply was detected and `message` may be content
        /// that was already on screen before the command was sent.
        stale: bool,
    },
    /// The operation failed.
    Failure(Failure),
}

impl Outcome {
    /// A fresh success.
    pub fn success(message: impl Into<String>) -> Self {
        Outcome::Success {
            message: message.into(),
            stale: false,
        }
    }

    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Returns true for a success whose content may be stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, Outcome::Success { stale: true, .. })
    }

    /// The message to show, for either variant.
    pub fn message(&self) -> &str {
        match self {
            Outcome::Success { message, .. } => message,
            Outcome::Failure(failure) => &failure.message,
        }
    }

    /// The failure kind, if this is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure(failure) => Some(failure.kind),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}
