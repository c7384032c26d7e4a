//! The gatekeeper every caller request passes through.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::audit::AuditLog;
use super::handler::{PolicyDecision, PolicyHandler, SandboxPolicy};
use crate::config::Config;
use crate::outcome::Failure;

/// Mediates every caller, command and path against a [`PolicyHandler`] and
/// records outcomes in the [`AuditLog`].
#[derive(Clone)]
pub struct Gatekeeper {
    policy: Arc<dyn PolicyHandler>,
    audit: AuditLog,
}

impl fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl Gatekeeper {
    /// Create a gatekeeper from a policy and an audit log.
    pub fn new(policy: Arc<dyn PolicyHandler>, audit: AuditLog) -> Self {
        Self { policy, audit }
    }

    /// Build the sandbox policy and audit log described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SandboxPolicy::from_config(config)),
            AuditLog::new(&config.log_dir),
        )
    }

    /// Whether `caller_id` may use the system.
    pub fn caller_allowed(&self, caller_id: &str) -> bool {
        self.policy.check_caller(caller_id).is_allowed()
    }

    /// Whether `command` may be sent to the assistant.
    pub fn command_allowed(&self, command: &str) -> bool {
        self.policy.check_command(command).is_allowed()
    }

    /// Whether `path` may be read or written.
    pub fn path_allowed(&self, path: &Path) -> bool {
        self.policy.check_path(path).is_allowed()
    }

    /// Append an audit record. Never fails.
    pub fn audit(&self, caller_id: &str, command: &str, success: bool, result_summary: &str) {
        self.audit
            .record(caller_id, command, success, result_summary);
    }

    /// The underlying audit log.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Admit a caller's command, or return an audited policy failure.
    pub fn admit(&self, caller_id: &str, command: &str) -> Result<(), Failure> {
        self.enforce(caller_id, command, self.policy.check_caller(caller_id))?;
        self.enforce(caller_id, command, self.policy.check_command(command))
    }

    /// Admit a caller's access to `path`, or return an audited policy failure.
    ///
    /// `label` is what gets audited, e.g. `pull ~/notes.txt`.
    pub fn admit_path(&self, caller_id: &str, label: &str, path: &Path) -> Result<(), Failure> {
        self.enforce(caller_id, label, self.policy.check_caller(caller_id))?;
        self.enforce(caller_id, label, self.policy.check_path(path))
    }

    /// Admit a caller for an operation without a command payload.
    pub fn admit_caller(&self, caller_id: &str, label: &str) -> Result<(), Failure> {
        self.enforce(caller_id, label, self.policy.check_caller(caller_id))
    }

    fn enforce(&self, caller_id: &str, label: &str, decision: PolicyDecision) -> Result<(), Failure> {
        match decision {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(reason) => {
                tracing::warn!("Denied {:?} for caller {}: {}", label, caller_id, reason);
                self.audit(caller_id, label, false, &reason);
                Err(Failure::policy_denied(reason))
            }
        }
    }
}
