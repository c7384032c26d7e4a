//! Size limits for replies returned to callers

use serde::{Deserialize, Serialize};

/// Returned in place of a reply that is empty or all whitespace.
pub const NO_OUTPUT: &str = "(no output)";

/// Size caps applied to a reply before it is handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyLimits {
    /// Lines kept when falling back to raw scrollback
    pub max_lines: usize,
    /// Characters kept, counted from the end
    pub max_chars: usize,
}

impl Default for ReplyLimits {
    fn default() -> Self {
        Self {
            max_lines: 40,
            max_chars: 4000,
        }
    }
}

impl ReplyLimits {
    /// Cap `text` to `max_chars`, keeping the most recent content.
    ///
    /// An all-whitespace result is replaced by [`NO_OUTPUT`]. Text already
    /// within the cap comes back unchanged, so applying this twice is the
    /// same as applying it once.
    pub fn cap_chars(&self, text: &str) -> String {
        // The sentinel itself is never truncated.
        if text == NO_OUTPUT {
            return text.to_string();
        }
        let total = text.chars().count();
        let capped = if total > self.max_chars {
            let skip = total - self.max_chars;
            text.chars().skip(skip).collect()
        } else {
            text.to_string()
        };

        if capped.trim().is_empty() {
            NO_OUTPUT.to_string()
        } else {
            capped
        }
    }
}

/// The last `n` lines of `text`, joined by newlines.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
