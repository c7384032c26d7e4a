//! The multiplexer seam and its tmux implementation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::DriverError;

/// Primitive operations on a named multiplexer session.
///
/// Implementations hold no session state; every call names its session.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Whether a session called `name` exists.
    async fn has_session(&self, name: &str) -> Result<bool, DriverError>;

    /// Create a detached session running `command` in `cwd`.
    async fn new_session(&self, name: &str, cwd: &Path, command: &str) -> Result<(), DriverError>;

    /// Type `text` into the session literally, without interpreting key names.
    async fn send_literal(&self, name: &str, text: &str) -> Result<(), DriverError>;

    /// Press a named key such as `Enter` or `C-u`.
    async fn send_key(&self, name: &str, key: &str) -> Result<(), DriverError>;

    /// Leave copy or scroll mode if the pane is in one.
    async fn cancel_mode(&self, name: &str) -> Result<(), DriverError>;

    /// Capture the last `lines` lines of the pane with escape sequences kept
    /// and wrapped lines joined. With `alternate` set, capture the alternate
    /// screen; fails with [`DriverError::NoAlternateScreen`] if there is none.
    async fn capture(&self, name: &str, lines: usize, alternate: bool)
    -> Result<String, DriverError>;

    /// Mirror all pane output into `log` by appending. A no-op if a mirror
    /// is already attached.
    async fn pipe_output(&self, name: &str, log: &Path) -> Result<(), DriverError>;

    /// Kill the session. Returns false if it did not exist.
    async fn kill_session(&self, name: &str) -> Result<bool, DriverError>;
}

/// Drives sessions by running the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxControl {
    program: String,
    timeout: Duration,
}

impl Default for TmuxControl {
    fn default() -> Self {
        Self::new("tmux", Duration::from_secs(5))
    }
}

impl TmuxControl {
    /// Use `program` as the tmux binary, bounding every call by `timeout`.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Run one tmux subcommand and return its stdout.
    async fn run(&self, operation: &'static str, args: &[&str]) -> Result<String, DriverError> {
        let out = self.run_status(operation, args).await?;
        if out.success {
            return Ok(out.stdout);
        }
        if out.stderr.contains("no alternate screen") {
            return Err(DriverError::NoAlternateScreen);
        }
        Err(DriverError::Command {
            operation,
            status: out.code,
            stderr: out.stderr,
        })
    }

    /// Run one tmux subcommand and report its exit status without failing
    /// on a non-zero code.
    async fn run_status(
        &self,
        operation: &'static str,
        args: &[&str],
    ) -> Result<Output, DriverError> {
        tracing::trace!("{} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriverError::ToolMissing {
                    program: self.program.clone(),
                });
            }
            Ok(Err(e)) => return Err(DriverError::Io(e)),
            Err(_) => {
                return Err(DriverError::Timeout {
                    operation,
                    after: self.timeout,
                });
            }
        };

        Ok(Output {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

struct Output {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Quote `s` for `sh -c`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl Multiplexer for TmuxControl {
    async fn has_session(&self, name: &str) -> Result<bool, DriverError> {
        let out = self
            .run_status("has-session", &["has-session", "-t", name])
            .await?;
        Ok(out.success)
    }

    async fn new_session(&self, name: &str, cwd: &Path, command: &str) -> Result<(), DriverError> {
        let cwd = cwd.to_string_lossy();
        self.run(
            "new-session",
            &["new-session", "-d", "-s", name, "-c", &cwd, command],
        )
        .await?;
        Ok(())
    }

    async fn send_literal(&self, name: &str, text: &str) -> Result<(), DriverError> {
        self.run("send-keys", &["send-keys", "-t", name, "-l", "--", text])
            .await?;
        Ok(())
    }

    async fn send_key(&self, name: &str, key: &str) -> Result<(), DriverError> {
        self.run("send-keys", &["send-keys", "-t", name, key]).await?;
        Ok(())
    }

    async fn cancel_mode(&self, name: &str) -> Result<(), DriverError> {
        self.run("send-keys", &["send-keys", "-t", name, "-X", "cancel"])
            .await?;
        Ok(())
    }

    async fn capture(
        &self,
        name: &str,
        lines: usize,
        alternate: bool,
    ) -> Result<String, DriverError> {
        let start = format!("-{lines}");
        let mut args = vec!["capture-pane", "-p", "-e", "-J", "-t", name, "-S", &start];
        if alternate {
            args.push("-a");
        }
        self.run("capture-pane", &args).await
    }

    async fn pipe_output(&self, name: &str, log: &Path) -> Result<(), DriverError> {
        let sink = format!("cat >> {}", shell_quote(&log.to_string_lossy()));
        // -o only opens a pipe when none is attached.
        self.run("pipe-pane", &["pipe-pane", "-o", "-t", name, &sink])
            .await?;
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<bool, DriverError> {
        let out = self
            .run_status("kill-session", &["kill-session", "-t", name])
            .await?;
        Ok(out.success)
    }
}
