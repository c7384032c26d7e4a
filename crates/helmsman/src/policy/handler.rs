//! Policy handler trait and the sandbox policy.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use glob::MatchOptions;

use super::path::{canonicalize_lenient, expand_home, resolve_path};
use crate::config::Config;

/// The result of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The request is allowed.
    Allow,
    /// The request is denied with a reason.
    Deny(String),
}

impl PolicyDecision {
    /// Returns true if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Returns the denial reason if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Allow => None,
            PolicyDecision::Deny(reason) => Some(reason),
        }
    }
}

/// Trait for policy handlers that decide admissibility of callers,
/// commands and filesystem paths.
///
/// Implementations must be pure and fast: they run before every operation
/// and must not touch the session or the filesystem beyond resolving paths.
pub trait PolicyHandler: Send + Sync {
    /// Check whether `caller_id` may use the system at all.
    fn check_caller(&self, caller_id: &str) -> PolicyDecision;

    /// Check whether `command` may be sent to the assistant.
    fn check_command(&self, command: &str) -> PolicyDecision;

    /// Check whether `path` may be read or written.
    ///
    /// Implementations resolve `path` to its canonical form themselves, so a
    /// raw caller-supplied path cannot bypass the check.
    fn check_path(&self, path: &Path) -> PolicyDecision;
}

/// A prohibited-path rule.
#[derive(Clone, Debug)]
enum PathRule {
    /// Deny every path whose canonical form starts with this string.
    Prefix(String),
    /// Deny every path with an ancestor matching this pattern, where `*`
    /// stays within one path component.
    Pattern(glob::Pattern),
}

const SINGLE_SEGMENT: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PathRule {
    fn parse(raw: &str) -> Self {
        let raw = expand_home(Path::new(raw)).to_string_lossy().into_owned();
        if !raw.contains(['*', '?']) {
            return PathRule::Prefix(raw);
        }
        match glob::Pattern::new(&raw) {
            Ok(pattern) => PathRule::Pattern(pattern),
            Err(e) => {
                // Fail closed: an unparsable pattern still denies its literal prefix.
                tracing::warn!("Invalid prohibited path pattern {}: {}", raw, e);
                PathRule::Prefix(raw)
            }
        }
    }

    fn matches(&self, canonical: &Path) -> bool {
        match self {
            PathRule::Prefix(prefix) => canonical.to_string_lossy().starts_with(prefix.as_str()),
            PathRule::Pattern(pattern) => canonical
                .ancestors()
                .any(|ancestor| pattern.matches_path_with(ancestor, SINGLE_SEGMENT)),
        }
    }
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRule::Prefix(prefix) => f.write_str(prefix),
            PathRule::Pattern(pattern) => f.write_str(pattern.as_str()),
        }
    }
}

/// The process-wide access policy.
///
/// - Callers: an empty allow-list admits everyone (and logs a warning each
///   time); otherwise only listed ids are admitted.
/// - Commands: denied when the lower-cased command contains any blocked
///   substring.
/// - Paths: anything under the sandbox root is allowed; outside it, the
///   first matching prohibited rule denies; everything else is allowed.
#[derive(Clone, Debug)]
pub struct SandboxPolicy {
    allowed_callers: HashSet<String>,
    blocked_substrings: Vec<String>,
    sandbox_enabled: bool,
    sandbox_root: PathBuf,
    prohibited: Vec<PathRule>,
}

impl SandboxPolicy {
    /// Start building a policy.
    pub fn builder(sandbox_root: impl AsRef<Path>) -> SandboxPolicyBuilder {
        SandboxPolicyBuilder::new(sandbox_root)
    }

    /// Build the policy described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder(&config.workspace_dir).sandbox(config.sandbox.enabled);
        for id in &config.allowed_callers {
            builder = builder.allow_caller(id);
        }
        for blocked in &config.blocked_commands {
            builder = builder.block_command(blocked);
        }
        for pattern in &config.sandbox.prohibited_paths {
            builder = builder.prohibit(pattern);
        }
        builder.build()
    }
}

impl PolicyHandler for SandboxPolicy {
    fn check_caller(&self, caller_id: &str) -> PolicyDecision {
        if self.allowed_callers.is_empty() {
            tracing::warn!("No caller allow-list configured, admitting caller {}", caller_id);
            return PolicyDecision::Allow;
        }
        if self.allowed_callers.contains(caller_id) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny(format!("caller {caller_id} is not allowed"))
        }
    }

    fn check_command(&self, command: &str) -> PolicyDecision {
        let lowered = command.to_lowercase();
        match self
            .blocked_substrings
            .iter()
            .find(|blocked| lowered.contains(blocked.as_str()))
        {
            Some(blocked) => {
                tracing::warn!("Command contains blocked keyword {:?}", blocked);
                PolicyDecision::Deny(format!("command contains blocked keyword {blocked:?}"))
            }
            None => PolicyDecision::Allow,
        }
    }

    fn check_path(&self, path: &Path) -> PolicyDecision {
        if !self.sandbox_enabled {
            return PolicyDecision::Allow;
        }

        let canonical = resolve_path(path, &self.sandbox_root);
        if canonical.starts_with(&self.sandbox_root) {
            return PolicyDecision::Allow;
        }

        match self.prohibited.iter().find(|rule| rule.matches(&canonical)) {
            Some(rule) => {
                tracing::warn!(
                    "Path {} denied by prohibited rule {}",
                    canonical.display(),
                    rule
                );
                PolicyDecision::Deny(format!(
                    "access to {} is prohibited ({rule})",
                    canonical.display()
                ))
            }
            None => PolicyDecision::Allow,
        }
    }
}

/// Builder for [`SandboxPolicy`].
///
/// # Example
///
/// ```rust
/// use helmsman::policy::{PolicyHandler, SandboxPolicy};
///
/// let policy = SandboxPolicy::builder("/work")
///     .block_command("sudo")
///     .prohibit("/etc")
///     .prohibit("/Users/*/Library")
///     .build();
///
/// assert!(!policy.check_command("Sudo rm -rf /").is_allowed());
/// assert!(!policy.check_path("/etc/passwd".as_ref()).is_allowed());
/// ```
#[derive(Clone, Debug)]
pub struct SandboxPolicyBuilder {
    allowed_callers: HashSet<String>,
    blocked_substrings: Vec<String>,
    sandbox_enabled: bool,
    sandbox_root: PathBuf,
    prohibited: Vec<PathRule>,
}

impl SandboxPolicyBuilder {
    /// Create a builder with sandboxing enabled and no rules.
    pub fn new(sandbox_root: impl AsRef<Path>) -> Self {
        Self {
            allowed_callers: HashSet::new(),
            blocked_substrings: Vec::new(),
            sandbox_enabled: true,
            sandbox_root: sandbox_root.as_ref().to_path_buf(),
            prohibited: Vec::new(),
        }
    }

    /// Enable or disable path sandboxing.
    pub fn sandbox(mut self, enabled: bool) -> Self {
        self.sandbox_enabled = enabled;
        self
    }

    /// Add a caller id to the allow-list.
    pub fn allow_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.allowed_callers.insert(caller_id.into());
        self
    }

    /// Block commands containing `substring` (case-insensitive).
    ///
    /// Blank entries are ignored; they would otherwise block every command.
    pub fn block_command(mut self, substring: &str) -> Self {
        let substring = substring.trim();
        if !substring.is_empty() {
            self.blocked_substrings.push(substring.to_lowercase());
        }
        self
    }

    /// Prohibit paths outside the sandbox matching `pattern`.
    ///
    /// Without a wildcard the pattern is a literal prefix. With one, `*`
    /// matches within a single path component, and any path below a
    /// matching directory is prohibited too.
    pub fn prohibit(mut self, pattern: &str) -> Self {
        if !pattern.trim().is_empty() {
            self.prohibited.push(PathRule::parse(pattern.trim()));
        }
        self
    }

    /// Build the policy.
    pub fn build(self) -> SandboxPolicy {
        let root = expand_home(&self.sandbox_root);
        SandboxPolicy {
            allowed_callers: self.allowed_callers,
            blocked_substrings: self.blocked_substrings,
            sandbox_enabled: self.sandbox_enabled,
            sandbox_root: canonicalize_lenient(&root),
            prohibited: self.prohibited,
        }
    }
}
