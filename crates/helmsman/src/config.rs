//! Configuration for the gatekeeper, the session driver and the executors.
//!
//! Configuration is read from a TOML file. Every section is optional and
//! falls back to the defaults below, so an empty file (or no file at all)
//! yields a usable configuration:
//!
//! ```toml
//! workspace_dir = "~/helmsman_workspace"
//! blocked_commands = ["rm -rf", "sudo"]
//! allowed_callers = ["1234567"]
//!
//! [sandbox]
//! enabled = true
//! prohibited_paths = ["/etc", "/Users/*/Library"]
//!
//! [poll]
//! delay = 2.5      # seconds
//! max_wait = 90
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::MarkerSet;
use crate::limits::ReplyLimits;
use crate::policy::expand_home;

/// Errors raised while loading or preparing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`Config`].
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A directory named by the configuration could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Process-wide configuration.
///
/// Read once at start-up and treated as read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory of the driven session and root of the sandbox.
    pub workspace_dir: PathBuf,
    /// Directory for audit logs, session bindings and the mirror log.
    pub log_dir: PathBuf,
    /// Case-insensitive substrings that make a command inadmissible.
    pub blocked_commands: Vec<String>,
    /// Caller ids allowed to use the system. Empty allows everyone.
    pub allowed_callers: Vec<String>,
    /// Filesystem sandbox settings.
    pub sandbox: SandboxConfig,
    /// How the assistant program is launched.
    pub assistant: AssistantConfig,
    /// The persistent multiplexer session.
    pub session: SessionConfig,
    /// Reply polling.
    pub poll: PollConfig,
    /// Size caps applied to replies before they are returned.
    pub reply: ReplyLimits,
    /// Marker glyphs used to find the assistant's reply in the scrollback.
    pub markers: MarkerSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: dirs::home_dir()
                .map(|home| home.join("helmsman_workspace"))
                .unwrap_or_else(|| PathBuf::from("helmsman_workspace")),
            log_dir: PathBuf::from("logs"),
            blocked_commands: ["rm -rf", "sudo", "nc", "ncat"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_callers: Vec::new(),
            sandbox: SandboxConfig::default(),
            assistant: AssistantConfig::default(),
            session: SessionConfig::default(),
            poll: PollConfig::default(),
            reply: ReplyLimits::default(),
            markers: MarkerSet::default(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        Ok(config.expand_paths())
    }

    /// Load configuration from `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default().expand_paths()),
        }
    }

    /// Create the workspace and log directories if they are missing.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.workspace_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path of the file mirroring the session's raw output.
    pub fn mirror_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.session.log_file)
    }

    /// Path of the caller → pinned session id file.
    pub fn bindings_path(&self) -> PathBuf {
        self.log_dir.join("session_bindings.json")
    }

    fn expand_paths(mut self) -> Self {
        self.workspace_dir = expand_home(&self.workspace_dir);
        self.log_dir = expand_home(&self.log_dir);
        self.assistant.state_dir = expand_home(&self.assistant.state_dir);
        self
    }
}

/// Filesystem sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// When false every path is admissible.
    pub enabled: bool,
    /// Paths denied outside the workspace: literal prefixes, or patterns
    /// where `*` stands for a single path component.
    pub prohibited_paths: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prohibited_paths: ["/System", "/Users/*/Library", "/private", "/etc"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// How the assistant program is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Binary used for one-shot execution.
    pub cli_path: String,
    /// Startup command run inside the persistent session.
    pub tui_command: String,
    /// Hard timeout for one-shot execution.
    #[serde(with = "duration_secs")]
    pub execution_timeout: Duration,
    /// The assistant's own state directory, used to list its sessions.
    pub state_dir: PathBuf,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            tui_command: "claude".to_string(),
            execution_timeout: Duration::from_secs(300),
            state_dir: PathBuf::from("~/.claude"),
        }
    }
}

/// The persistent multiplexer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name, one per deployment.
    pub name: String,
    /// Multiplexer control binary.
    pub multiplexer: String,
    /// Default number of scrollback lines to capture.
    pub capture_lines: usize,
    /// Mirror log file, relative to `log_dir` unless absolute.
    pub log_file: PathBuf,
    /// Timeout for each individual multiplexer call.
    #[serde(with = "duration_secs")]
    pub control_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "helmsman-assistant".to_string(),
            multiplexer: "tmux".to_string(),
            capture_lines: 200,
            log_file: PathBuf::from("tui_output.log"),
            control_timeout: Duration::from_secs(5),
        }
    }
}

/// Reply polling after a command has been sent to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Number of capture attempts. Zero derives it from `max_wait / delay`.
    pub attempts: u32,
    /// Sleep before each capture attempt.
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    /// Polling budget used when `attempts` is zero.
    #[serde(with = "duration_secs")]
    pub max_wait: Duration,
    /// Outer bound on a whole interactive run, including waiting for the
    /// session lock.
    #[serde(with = "duration_secs")]
    pub run_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay: Duration::from_secs(3),
            max_wait: Duration::from_secs(120),
            run_timeout: Duration::from_secs(150),
        }
    }
}

impl PollConfig {
    /// Number of capture attempts actually made. Always at least one.
    pub fn effective_attempts(&self) -> u32 {
        if self.attempts > 0 {
            return self.attempts;
        }
        if self.delay.is_zero() {
            return 1;
        }
        let derived = (self.max_wait.as_secs_f64() / self.delay.as_secs_f64()).ceil();
        (derived as u32).max(1)
    }

    /// Total wall-clock polling budget (`attempts × delay`).
    pub fn budget(&self) -> Duration {
        self.delay.saturating_mul(self.effective_attempts())
    }
}

/// Durations are written as (fractional) seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
