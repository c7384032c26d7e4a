//! Removal of terminal decoration from captured text.

use std::sync::LazyLock;

use regex_lite::Regex;

/// OSC strings, CSI sequences, charset selection and two-byte escapes.
static ESCAPES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b[()][0-9A-Za-z]",
        r"|\x1b[@-Z\\-_]",
    ))
    .map_err(|e| tracing::error!("Invalid escape pattern: {}", e))
    .ok()
});

/// Strip escape sequences and non-printable characters from `raw`.
///
/// Escape sequences go first, then every control character except newline
/// and tab, then surrounding whitespace. Applying this twice is the same as
/// applying it once.
///
/// ```rust
/// use helmsman::extract::strip_decoration;
///
/// assert_eq!(strip_decoration("\x1b[32m⏺ done\x1b[0m\r\n"), "⏺ done");
/// ```
pub fn strip_decoration(raw: &str) -> String {
    let without_escapes = match ESCAPES.as_ref() {
        Some(re) => re.replace_all(raw, ""),
        None => raw.into(),
    };
    without_escapes
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
