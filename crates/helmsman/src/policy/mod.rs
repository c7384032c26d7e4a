//! Access control for callers, commands and filesystem paths.
//!
//! Every request passes the [`Gatekeeper`] before it reaches the session or
//! the filesystem:
//!
//! - **Callers** must be on the allow-list (an empty list admits everyone).
//! - **Commands** must not contain a blocked substring, case-insensitively.
//! - **Paths** are canonicalized first (`~`, `..` and symlinks resolved).
//!   Anything under the sandbox root is allowed; outside it, prohibited
//!   prefixes and single-segment glob patterns deny.
//!
//! Decisions are pure. Outcomes, allowed or not, end up in the daily
//! [`AuditLog`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use helmsman::policy::{AuditLog, Gatekeeper, SandboxPolicy};
//!
//! let policy = SandboxPolicy::builder("/work")
//!     .block_command("rm -rf")
//!     .prohibit("/Users/*/Library")
//!     .build();
//! let gate = Gatekeeper::new(Arc::new(policy), AuditLog::new("/tmp/helmsman-audit"));
//!
//! assert!(!gate.command_allowed("please rm -rf /tmp"));
//! assert!(!gate.path_allowed("/Users/bob/Library/secrets.txt".as_ref()));
//! assert!(gate.path_allowed("/work/report.txt".as_ref()));
//! ```

mod audit;
mod gatekeeper;
mod handler;
mod path;

pub use audit::{AuditLog, AuditRecord};
pub use gatekeeper::Gatekeeper;
pub use handler::{PolicyDecision, PolicyHandler, SandboxPolicy, SandboxPolicyBuilder};
pub use path::{canonicalize_lenient, expand_home, resolve_path};
