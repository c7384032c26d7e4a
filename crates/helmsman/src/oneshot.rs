//! Non-interactive, single-prompt execution of the assistant.
//!
//! Each call spawns its own process, so calls from different callers can run
//! concurrently without touching the shared session.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use crate::bindings::SessionBindings;
use crate::config::Config;
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::policy::Gatekeeper;

/// Proxy variables stripped from the assistant's environment.
const PROXY_VARS: [&str; 6] = [
    "http_proxy",
    "https_proxy",
    "all_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
];

/// Message returned when the assistant succeeds without printing anything.
pub const EMPTY_OUTPUT_MESSAGE: &str = "command completed with no output";

/// Which assistant conversation a one-shot command continues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionSelector {
    /// Use the caller's pinned session, or a fresh one if none is pinned.
    #[default]
    Auto,
    /// Use this session id.
    Explicit(String),
    /// Continue the assistant's most recent conversation.
    Continue,
}

/// Runs the assistant binary once per command.
#[derive(Debug, Clone)]
pub struct OneShotExecutor {
    gatekeeper: Arc<Gatekeeper>,
    bindings: Arc<SessionBindings>,
    cli_path: String,
    workspace: PathBuf,
    timeout: Duration,
}

impl OneShotExecutor {
    /// Create an executor running `cli_path` inside `workspace`.
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        bindings: Arc<SessionBindings>,
        cli_path: impl Into<String>,
        workspace: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            gatekeeper,
            bindings,
            cli_path: cli_path.into(),
            workspace: workspace.into(),
            timeout,
        }
    }

    /// Build an executor from configuration.
    pub fn from_config(
        gatekeeper: Arc<Gatekeeper>,
        bindings: Arc<SessionBindings>,
        config: &Config,
    ) -> Self {
        Self::new(
            gatekeeper,
            bindings,
            &config.assistant.cli_path,
            &config.workspace_dir,
            config.assistant.execution_timeout,
        )
    }

    /// Run `command` as a single prompt and return the assistant's output.
    pub async fn run(&self, caller_id: &str, command: &str, selector: SessionSelector) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit(caller_id, command) {
            return failure.into();
        }

        let args = self.arguments(caller_id, command, selector).await;
        tracing::info!("Running {} for caller {}", self.cli_path, caller_id);

        let (outcome, summary) = match self.spawn(&args).await {
            Ok(output) => interpret(output),
            Err(failure) => {
                let summary = failure.message.clone();
                (failure.into(), summary)
            }
        };
        self.gatekeeper
            .audit(caller_id, command, outcome.is_success(), &summary);
        outcome
    }

    async fn arguments(
        &self,
        caller_id: &str,
        command: &str,
        selector: SessionSelector,
    ) -> Vec<String> {
        let mut args = Vec::new();
        match selector {
            SessionSelector::Continue => args.push("--continue".to_string()),
            SessionSelector::Explicit(id) => {
                args.extend(["--session-id".to_string(), id]);
            }
            SessionSelector::Auto => {
                if let Some(id) = self.bindings.get(caller_id).await {
                    tracing::debug!("Using pinned session {} for caller {}", id, caller_id);
                    args.extend(["--session-id".to_string(), id]);
                }
            }
        }
        args.extend(["-p".to_string(), command.to_string()]);
        args
    }

    async fn spawn(&self, args: &[String]) -> Result<std::process::Output, Failure> {
        let mut cmd = Command::new(&self.cli_path);
        cmd.args(args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in PROXY_VARS {
            cmd.env_remove(var);
        }

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("{} not found: {}", self.cli_path, e);
                Err(Failure::new(
                    FailureKind::ToolMissing,
                    format!("{} is not installed or not on PATH", self.cli_path),
                ))
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to run {}: {}", self.cli_path, e);
                Err(Failure::unexpected(format!("failed to run {}: {e}", self.cli_path)))
            }
            Err(_) => {
                tracing::error!("{} timed out after {:?}", self.cli_path, self.timeout);
                Err(Failure::new(
                    FailureKind::ToolTimeout,
                    format!("command timed out after {:?}", self.timeout),
                ))
            }
        }
    }
}

/// Map a finished process to an outcome and its audit summary.
fn interpret(output: std::process::Output) -> (Outcome, String) {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if output.status.success() {
        let text = if stdout.is_empty() { stderr } else { stdout };
        let summary = text.clone();
        let message = if text.is_empty() {
            EMPTY_OUTPUT_MESSAGE.to_string()
        } else {
            text
        };
        (Outcome::success(message), summary)
    } else {
        tracing::warn!("Assistant exited with {}: {}", output.status, stderr);
        let summary = if stdout.is_empty() { stderr.clone() } else { stdout };
        (
            Failure::unexpected(format!("execution failed: {stderr}")).into(),
            summary,
        )
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use chrono::Local;

    use super::*;
    use crate::policy::{AuditLog, SandboxPolicy};

    /// Write an executable shell script standing in for the assistant.
    fn fake_cli(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-assistant");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn executor(dir: &Path, cli: &Path, timeout: Duration) -> OneShotExecutor {
        let workspace = dir.join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let policy = SandboxPolicy::builder(&workspace).block_command("sudo").build();
        let gatekeeper = Gatekeeper::new(Arc::new(policy), AuditLog::new(dir.join("logs")));
        OneShotExecutor::new(
            Arc::new(gatekeeper),
            Arc::new(SessionBindings::new(dir.join("logs/bindings.json"))),
            cli.to_string_lossy(),
            workspace,
            timeout,
        )
    }

    #[tokio::test]
    async fn test_passes_prompt_and_returns_stdout() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(temp.path(), r#"echo "args: $*""#);
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        let outcome = exec.run("alice", "hello there", SessionSelector::Auto).await;
        assert_eq!(outcome, Outcome::success("args: -p hello there"));
    }

    #[tokio::test]
    async fn test_session_selectors() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(temp.path(), r#"echo "$*""#);
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        let cont = exec.run("alice", "hi", SessionSelector::Continue).await;
        assert_eq!(cont.message(), "--continue -p hi");

        let explicit = exec
            .run("alice", "hi", SessionSelector::Explicit("s-1".to_string()))
            .await;
        assert_eq!(explicit.message(), "--session-id s-1 -p hi");

        exec.bindings.pin("alice", "pinned-9").await.unwrap();
        let auto = exec.run("alice", "hi", SessionSelector::Auto).await;
        assert_eq!(auto.message(), "--session-id pinned-9 -p hi");
        let other = exec.run("bob", "hi", SessionSelector::Auto).await;
        assert_eq!(other.message(), "-p hi");
    }

    #[tokio::test]
    async fn test_runs_in_workspace_without_proxies() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(
            temp.path(),
            r#"pwd; echo "proxy=${https_proxy:-unset}${HTTP_PROXY:-unset}""#,
        );
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        // SAFETY: test-only environment mutation before the child is spawned.
        unsafe {
            std::env::set_var("https_proxy", "http://proxy:8080");
            std::env::set_var("HTTP_PROXY", "http://proxy:8080");
        }
        let outcome = exec.run("alice", "where", SessionSelector::Auto).await;
        unsafe {
            std::env::remove_var("https_proxy");
            std::env::remove_var("HTTP_PROXY");
        }

        let message = outcome.message().to_string();
        assert!(message.contains("/ws"), "{message}");
        assert!(message.ends_with("proxy=unsetunset"), "{message}");
    }

    #[tokio::test]
    async fn test_empty_output() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(temp.path(), "exit 0");
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        let outcome = exec.run("alice", "quiet", SessionSelector::Auto).await;
        assert_eq!(outcome, Outcome::success(EMPTY_OUTPUT_MESSAGE));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(temp.path(), "echo boom >&2; exit 3");
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        let outcome = exec.run("alice", "explode", SessionSelector::Auto).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unexpected));
        assert_eq!(outcome.message(), "execution failed: boom");
    }

    #[tokio::test]
    async fn test_timeout_and_missing_binary() {
        let temp = tempfile::tempdir().unwrap();
        let cli = fake_cli(temp.path(), "sleep 10");
        let slow = executor(temp.path(), &cli, Duration::from_millis(100));
        let outcome = slow.run("alice", "wait", SessionSelector::Auto).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ToolTimeout));

        let missing = executor(
            temp.path(),
            &temp.path().join("no-such-binary"),
            Duration::from_secs(1),
        );
        let outcome = missing.run("alice", "hi", SessionSelector::Auto).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ToolMissing));
    }

    #[tokio::test]
    async fn test_blocked_command_never_spawns() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("spawned");
        let cli = fake_cli(temp.path(), &format!("touch {}", marker.display()));
        let exec = executor(temp.path(), &cli, Duration::from_secs(10));

        let outcome = exec.run("alice", "SUDO reboot", SessionSelector::Auto).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PolicyDenied));
        assert!(!marker.exists());

        let records = exec
            .gatekeeper
            .audit_log()
            .read_day(Local::now().date_naive())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
    }
}
