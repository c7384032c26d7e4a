//! Policy-checked file transfer between callers and the host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::outcome::{Failure, Outcome};
use crate::policy::{Gatekeeper, resolve_path};

/// Moves files in and out of the host, one policy check per file.
///
/// Every path is resolved to its canonical form before the check and the
/// same canonical path is the one touched afterwards.
#[derive(Debug, Clone)]
pub struct TransferGate {
    gatekeeper: Arc<Gatekeeper>,
    workspace: PathBuf,
}

impl TransferGate {
    /// Create a gate writing uploads into `workspace`.
    pub fn new(gatekeeper: Arc<Gatekeeper>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            gatekeeper,
            workspace: workspace.into(),
        }
    }

    /// Build a gate for the configured workspace.
    pub fn from_config(gatekeeper: Arc<Gatekeeper>, config: &Config) -> Self {
        Self::new(gatekeeper, &config.workspace_dir)
    }

    /// Check that `path` may be sent to the caller.
    ///
    /// On success the message is the canonical path of the file to send.
    pub async fn pull(&self, caller_id: &str, path: &str) -> Outcome {
        let label = format!("pull {path}");
        let canonical = resolve_path(Path::new(path), &self.workspace);
        if let Err(failure) = self.gatekeeper.admit_path(caller_id, &label, &canonical) {
            return failure.into();
        }

        let outcome: Outcome = match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_dir() => {
                Failure::unexpected(format!("{} is a directory, not a file", canonical.display()))
                    .into()
            }
            Ok(meta) => {
                self.gatekeeper.audit(
                    caller_id,
                    &label,
                    true,
                    &format!("file size: {} bytes", meta.len()),
                );
                return Outcome::success(canonical.to_string_lossy());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Failure::unexpected(format!("{} does not exist", canonical.display())).into()
            }
            Err(e) => {
                tracing::error!("Failed to stat {}: {}", canonical.display(), e);
                Failure::unexpected(format!("cannot read {}: {e}", canonical.display())).into()
            }
        };
        self.gatekeeper
            .audit(caller_id, &label, false, outcome.message());
        outcome
    }

    /// Save `bytes` as `filename` in the workspace.
    pub async fn push(&self, caller_id: &str, filename: &str, bytes: &[u8]) -> Outcome {
        let label = format!("push {filename}");
        if filename.trim().is_empty() {
            let failure = Failure::unexpected("file name must not be empty");
            self.gatekeeper.audit(caller_id, &label, false, &failure.message);
            return failure.into();
        }

        let target = resolve_path(&self.workspace.join(filename), &self.workspace);
        if let Err(failure) = self.gatekeeper.admit_path(caller_id, &label, &target) {
            return failure.into();
        }

        let written = async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await
        }
        .await;

        match written {
            Ok(()) => {
                self.gatekeeper.audit(
                    caller_id,
                    &label,
                    true,
                    &format!("file size: {} bytes", bytes.len()),
                );
                Outcome::success(format!("saved to {}", target.display()))
            }
            Err(e) => {
                tracing::error!("Failed to write {}: {}", target.display(), e);
                let failure =
                    Failure::unexpected(format!("failed to write {}: {e}", target.display()));
                self.gatekeeper.audit(caller_id, &label, false, &failure.message);
                failure.into()
            }
        }
    }
}
