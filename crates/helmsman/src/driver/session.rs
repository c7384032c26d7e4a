//! Lifecycle of the single named assistant session.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{DriverError, Multiplexer};
use crate::config::Config;
use crate::extract::strip_decoration;
use crate::limits::tail_lines;

/// Upper bound on how much of the mirror log is read for a fallback capture.
const MIRROR_TAIL_BYTES: u64 = 256 * 1024;

/// What [`SessionDriver::ensure_session`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    /// A new session was created.
    Created,
    /// The session was already running.
    AlreadyRunning,
}

/// Where a [`CapturedBuffer`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    /// Captured from the live pane.
    Pane,
    /// The pane was blank; read from the tail of the mirror log.
    MirrorLog,
}

/// A snapshot of the session's scrollback.
#[derive(Debug, Clone)]
pub struct CapturedBuffer {
    /// Text as emitted, escape sequences included.
    pub raw_text: String,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Local>,
    /// Where the text came from.
    pub source: BufferSource,
}

/// Owns one named multiplexer session running the assistant.
///
/// The session is created lazily and mirrored into a log file. The driver
/// does no locking of its own; callers that interleave keystrokes must
/// serialize access.
pub struct SessionDriver {
    mux: Arc<dyn Multiplexer>,
    name: String,
    cwd: PathBuf,
    startup_command: String,
    log_path: PathBuf,
    capture_lines: usize,
    mirror_attached: AtomicBool,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("name", &self.name)
            .field("cwd", &self.cwd)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

impl SessionDriver {
    /// Create a driver for session `name`.
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        startup_command: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mux,
            name: name.into(),
            cwd: cwd.into(),
            startup_command: startup_command.into(),
            log_path: log_path.into(),
            capture_lines: 200,
            mirror_attached: AtomicBool::new(false),
        }
    }

    /// Build a driver from configuration.
    pub fn from_config(mux: Arc<dyn Multiplexer>, config: &Config) -> Self {
        Self::new(
            mux,
            &config.session.name,
            &config.workspace_dir,
            &config.assistant.tui_command,
            config.mirror_log_path(),
        )
        .with_capture_lines(config.session.capture_lines)
    }

    /// Set the default number of lines to capture.
    pub fn with_capture_lines(mut self, lines: usize) -> Self {
        self.capture_lines = lines.max(1);
        self
    }

    /// Session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the mirror log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Whether the session currently exists.
    pub async fn is_running(&self) -> Result<bool, DriverError> {
        self.mux.has_session(&self.name).await
    }

    /// Make sure the session exists and is mirrored, creating it if needed.
    pub async fn ensure_session(&self) -> Result<SessionStart, DriverError> {
        if self.mux.has_session(&self.name).await? {
            self.attach_mirror().await;
            return Ok(SessionStart::AlreadyRunning);
        }

        tokio::fs::create_dir_all(&self.cwd).await?;
        tracing::info!(
            "Creating session {} in {} running {:?}",
            self.name,
            self.cwd.display(),
            self.startup_command
        );
        self.mux
            .new_session(&self.name, &self.cwd, &self.startup_command)
            .await?;
        // A fresh session never has a pipe attached.
        self.mirror_attached.store(false, Ordering::Release);
        self.attach_mirror().await;
        Ok(SessionStart::Created)
    }

    /// Type `text` into the session and press Enter.
    pub async fn send_text(&self, text: &str) -> Result<(), DriverError> {
        match self.mux.cancel_mode(&self.name).await {
            Ok(()) => {}
            // Not being in copy mode is the common case.
            Err(DriverError::Command { .. }) => {}
            Err(e) => return Err(e),
        }
        self.mux.send_key(&self.name, "C-u").await?;
        self.mux.send_literal(&self.name, text).await?;
        self.mux.send_key(&self.name, "Enter").await
    }

    /// Capture the last `lines` lines of scrollback (default from config).
    pub async fn capture(&self, lines: Option<usize>) -> Result<CapturedBuffer, DriverError> {
        let lines = lines.unwrap_or(self.capture_lines).max(1);
        let raw_text = match self.mux.capture(&self.name, lines, true).await {
            Err(DriverError::NoAlternateScreen) => {
                tracing::debug!("No alternate screen in {}, capturing main screen", self.name);
                self.mux.capture(&self.name, lines, false).await?
            }
            other => other?,
        };

        self.attach_mirror().await;

        if strip_decoration(&raw_text).is_empty() {
            match self.read_mirror_tail(lines).await {
                Ok(tail) if !strip_decoration(&tail).is_empty() => {
                    tracing::debug!("Pane {} is blank, using mirror log", self.name);
                    return Ok(CapturedBuffer {
                        raw_text: tail,
                        captured_at: Local::now(),
                        source: BufferSource::MirrorLog,
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to read mirror log {}: {}", self.log_path.display(), e);
                }
            }
        }

        Ok(CapturedBuffer {
            raw_text,
            captured_at: Local::now(),
            source: BufferSource::Pane,
        })
    }

    /// Kill the session. Returns false if it was not running.
    pub async fn kill_session(&self) -> Result<bool, DriverError> {
        let killed = self.mux.kill_session(&self.name).await?;
        self.mirror_attached.store(false, Ordering::Release);
        if killed {
            tracing::info!("Killed session {}", self.name);
        }
        Ok(killed)
    }

    /// Attach the mirror pipe once. Failures are logged, not returned.
    async fn attach_mirror(&self) {
        if self.mirror_attached.load(Ordering::Acquire) {
            return;
        }
        if let Some(parent) = self.log_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            tracing::warn!("Failed to create {}: {}", parent.display(), e);
            return;
        }
        match self.mux.pipe_output(&self.name, &self.log_path).await {
            Ok(()) => {
                self.mirror_attached.store(true, Ordering::Release);
                tracing::debug!("Mirroring {} to {}", self.name, self.log_path.display());
            }
            Err(e) => tracing::warn!("Failed to mirror {}: {}", self.name, e),
        }
    }

    async fn read_mirror_tail(&self, lines: usize) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(&self.log_path).await?;
        let len = file.metadata().await?.len();
        let start = len.saturating_sub(MIRROR_TAIL_BYTES);
        file.seek(SeekFrom::Start(start)).await?;
        let mut bytes = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut bytes).await?;
        Ok(tail_lines(&String::from_utf8_lossy(&bytes), lines))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingMux {
        running: AtomicBool,
        no_alternate: bool,
        in_copy_mode: bool,
        captures: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingMux {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Multiplexer for RecordingMux {
        async fn has_session(&self, name: &str) -> Result<bool, DriverError> {
            self.log(format!("has-session {name}"));
            Ok(self.running.load(Ordering::SeqCst))
        }

        async fn new_session(
            &self,
            name: &str,
            _cwd: &Path,
            command: &str,
        ) -> Result<(), DriverError> {
            self.log(format!("new-session {name} {command}"));
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_literal(&self, _name: &str, text: &str) -> Result<(), DriverError> {
            self.log(format!("literal {text}"));
            Ok(())
        }

        async fn send_key(&self, _name: &str, key: &str) -> Result<(), DriverError> {
            self.log(format!("key {key}"));
            Ok(())
        }

        async fn cancel_mode(&self, _name: &str) -> Result<(), DriverError> {
            self.log("cancel".to_string());
            if self.in_copy_mode {
                Ok(())
            } else {
                Err(DriverError::Command {
                    operation: "send-keys",
                    status: Some(1),
                    stderr: "not in a mode".to_string(),
                })
            }
        }

        async fn capture(
            &self,
            _name: &str,
            lines: usize,
            alternate: bool,
        ) -> Result<String, DriverError> {
            self.log(format!("capture {lines} alternate={alternate}"));
            if alternate && self.no_alternate {
                return Err(DriverError::NoAlternateScreen);
            }
            Ok(self.captures.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn pipe_output(&self, _name: &str, _log: &Path) -> Result<(), DriverError> {
            self.log("pipe".to_string());
            Ok(())
        }

        async fn kill_session(&self, _name: &str) -> Result<bool, DriverError> {
            self.log("kill".to_string());
            Ok(self.running.swap(false, Ordering::SeqCst))
        }
    }

    fn driver(mux: Arc<RecordingMux>, dir: &Path) -> SessionDriver {
        SessionDriver::new(mux, "helm", dir.join("work"), "claude", dir.join("logs/tui.log"))
    }

    #[tokio::test]
    async fn test_ensure_session_creates_once() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux::default());
        let driver = driver(mux.clone(), temp.path());

        assert_eq!(driver.ensure_session().await.unwrap(), SessionStart::Created);
        assert_eq!(
            driver.ensure_session().await.unwrap(),
            SessionStart::AlreadyRunning
        );
        assert!(temp.path().join("work").is_dir());

        let calls = mux.calls();
        assert_eq!(
            calls,
            vec![
                "has-session helm",
                "new-session helm claude",
                "pipe",
                "has-session helm",
            ]
        );
    }

    #[tokio::test]
    async fn test_send_text_order() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux::default());
        let driver = driver(mux.clone(), temp.path());

        driver.send_text("hello world").await.unwrap();

        assert_eq!(
            mux.calls(),
            vec!["cancel", "key C-u", "literal hello world", "key Enter"]
        );
    }

    #[tokio::test]
    async fn test_capture_retries_without_alternate_screen() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux {
            no_alternate: true,
            captures: Mutex::new(VecDeque::from(["⏺ hi".to_string()])),
            ..Default::default()
        });
        let driver = driver(mux.clone(), temp.path()).with_capture_lines(50);

        let buffer = driver.capture(None).await.unwrap();
        assert_eq!(buffer.raw_text, "⏺ hi");
        assert_eq!(buffer.source, BufferSource::Pane);

        let calls = mux.calls();
        assert_eq!(calls[0], "capture 50 alternate=true");
        assert_eq!(calls[1], "capture 50 alternate=false");
    }

    #[tokio::test]
    async fn test_blank_capture_falls_back_to_mirror_log() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux {
            captures: Mutex::new(VecDeque::from(["\x1b[0m  \n".to_string()])),
            ..Default::default()
        });
        let driver = driver(mux, temp.path());
        std::fs::create_dir_all(temp.path().join("logs")).unwrap();
        std::fs::write(driver.log_path(), "old\n\x1b[1m⏺ from the log\x1b[0m\n").unwrap();

        let buffer = driver.capture(Some(1)).await.unwrap();
        assert_eq!(buffer.source, BufferSource::MirrorLog);
        assert!(buffer.raw_text.contains("from the log"));
        assert!(!buffer.raw_text.contains("old"));
    }

    #[tokio::test]
    async fn test_blank_capture_without_log_stays_blank() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux::default());
        let driver = driver(mux, temp.path());

        let buffer = driver.capture(None).await.unwrap();
        assert_eq!(buffer.raw_text, "");
        assert_eq!(buffer.source, BufferSource::Pane);
    }

    #[tokio::test]
    async fn test_kill_session_reports_absent() {
        let temp = tempfile::tempdir().unwrap();
        let mux = Arc::new(RecordingMux::default());
        let driver = driver(mux, temp.path());

        assert!(!driver.kill_session().await.unwrap());
        driver.ensure_session().await.unwrap();
        assert!(driver.kill_session().await.unwrap());
        assert!(!driver.is_running().await.unwrap());
    }
}
