//! Control of the long-lived assistant session inside a terminal multiplexer.
//!
//! [`Multiplexer`] is the narrow seam over the multiplexer's command line;
//! [`TmuxControl`] implements it by shelling out to `tmux`. [`SessionDriver`]
//! builds the session lifecycle (create, send, capture, kill) on top of it.

mod session;
mod tmux;

use std::time::Duration;

use thiserror::Error;

pub use session::{BufferSource, CapturedBuffer, SessionDriver, SessionStart};
pub use tmux::{Multiplexer, TmuxControl};

/// Errors from driving the multiplexer.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The multiplexer binary could not be found.
    #[error("{program} not found")]
    ToolMissing {
        /// Program that was invoked.
        program: String,
    },

    /// A multiplexer call did not return in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Subcommand that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The pane has no alternate screen to capture.
    #[error("no alternate screen")]
    NoAlternateScreen,

    /// A multiplexer call exited unsuccessfully.
    #[error("{operation} failed (status {status:?}): {stderr}")]
    Command {
        /// Subcommand that failed.
        operation: &'static str,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// Spawning or talking to the process failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
