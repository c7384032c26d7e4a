//! Helmsman: policy-gated remote control of an interactive assistant
//!
//! Helmsman drives a long-running interactive command-line assistant inside a
//! terminal multiplexer session on behalf of remote callers. Every command and
//! every file path passes a sandbox policy first, every outcome is audited,
//! and the assistant's latest reply is recovered from its decorated terminal
//! output without any structured protocol.

mod bindings;
mod config;
mod coordinator;
mod limits;
mod oneshot;
mod outcome;
mod runtime;
mod session_index;
mod transfer;

pub mod driver;
pub mod extract;
pub mod policy;

pub use bindings::{BindingError, SessionBindings};
pub use config::{
    AssistantConfig, Config, ConfigError, PollConfig, SandboxConfig, SessionConfig,
};
pub use coordinator::Coordinator;
pub use limits::{NO_OUTPUT, ReplyLimits};
pub use oneshot::{EMPTY_OUTPUT_MESSAGE, OneShotExecutor, SessionSelector};
pub use outcome::{Failure, FailureKind, Outcome};
pub use runtime::Helmsman;
pub use session_index::{SessionIndex, SessionSummary};
pub use transfer::TransferGate;
