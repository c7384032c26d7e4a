//! Heuristic detection of the assistant's latest reply block.

use serde::{Deserialize, Serialize};

use crate::limits::{ReplyLimits, tail_lines};

/// Trailing characters of the sent command used to find its echo.
const MARKER_TAIL_CHARS: usize = 32;

/// Glyphs that delimit reply blocks in the assistant's rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    /// A line starting with one of these opens a reply block.
    pub reply: Vec<String>,
    /// A line starting with one of these closes the open block.
    pub boundary: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            reply: ["⏺", "●"].map(String::from).to_vec(),
            boundary: [">", "❯", "╭", "╰", "│", "─", "✻"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl MarkerSet {
    fn reply_marker<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.reply
            .iter()
            .filter(|m| !m.is_empty())
            .find_map(|m| line.strip_prefix(m.as_str()))
    }

    fn is_boundary(&self, line: &str) -> bool {
        self.boundary
            .iter()
            .any(|m| !m.is_empty() && line.starts_with(m.as_str()))
    }
}

/// One extracted assistant turn: trimmed, printable lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyBlock {
    /// Lines of the reply, in order.
    pub lines: Vec<String>,
}

impl ReplyBlock {
    /// The lines joined by newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// True when no reply line was found.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Finds the assistant's reply in plain (already stripped) scrollback.
pub trait ReplyExtractor: Send + Sync {
    /// The latest reply block anywhere in `plain`.
    fn latest_reply(&self, plain: &str) -> ReplyBlock;

    /// The reply block following the last echo of `marker`, usually the
    /// command just sent. Empty when the marker never appears.
    fn reply_after(&self, plain: &str, marker: &str) -> ReplyBlock;
}

/// [`ReplyExtractor`] driven by a configurable [`MarkerSet`].
#[derive(Debug, Clone, Default)]
pub struct MarkerExtractor {
    markers: MarkerSet,
}

impl MarkerExtractor {
    /// Create an extractor for `markers`.
    pub fn new(markers: MarkerSet) -> Self {
        Self { markers }
    }

    /// Scan lines top to bottom and return the last block that was opened.
    ///
    /// A reply marker opens a new block, dropping any block still open. A
    /// boundary marker closes the open block and makes it the latest. A block
    /// left open at the end of input also becomes the latest.
    fn scan<'a>(&self, lines: impl Iterator<Item = &'a str>) -> ReplyBlock {
        let mut latest: Option<Vec<String>> = None;
        let mut open: Option<Vec<String>> = None;

        for line in lines {
            let trimmed = line.trim();
            if let Some(rest) = self.markers.reply_marker(trimmed) {
                let mut block = Vec::new();
                let rest = rest.trim();
                if !rest.is_empty() {
                    block.push(rest.to_string());
                }
                open = Some(block);
            } else if let Some(block) = open.as_mut() {
                if self.markers.is_boundary(trimmed) {
                    latest = open.take();
                } else if !trimmed.is_empty() {
                    block.push(trimmed.to_string());
                }
            }
        }

        ReplyBlock {
            lines: open.or(latest).unwrap_or_default(),
        }
    }
}

impl ReplyExtractor for MarkerExtractor {
    fn latest_reply(&self, plain: &str) -> ReplyBlock {
        self.scan(plain.lines())
    }

    fn reply_after(&self, plain: &str, marker: &str) -> ReplyBlock {
        let needle = echo_needle(marker);
        if needle.is_empty() {
            return ReplyBlock::default();
        }

        let lines: Vec<&str> = plain.lines().collect();
        match lines.iter().rposition(|line| line.contains(needle)) {
            Some(idx) => self.scan(lines[idx + 1..].iter().copied()),
            None => ReplyBlock::default(),
        }
    }
}

/// The part of `marker` most likely to survive echo and line wrapping: the
/// trailing characters of its last line.
fn echo_needle(marker: &str) -> &str {
    let last = marker.trim().lines().last().unwrap_or("").trim();
    let count = last.chars().count();
    if count <= MARKER_TAIL_CHARS {
        return last;
    }
    let start = last
        .char_indices()
        .nth(count - MARKER_TAIL_CHARS)
        .map_or(0, |(i, _)| i);
    last[start..].trim()
}

/// Bound a reply for display.
///
/// With no reply block, falls back to the last `max_lines` lines of `plain`
/// so the caller always gets something. The result is then capped to
/// `max_chars`, keeping the tail.
pub fn limit_reply_size(block: &ReplyBlock, plain: &str, limits: &ReplyLimits) -> String {
    let text = if block.is_empty() {
        tail_lines(plain, limits.max_lines)
    } else {
        block.text()
    };
    limits.cap_chars(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::NO_OUTPUT;

    fn extractor() -> MarkerExtractor {
        MarkerExtractor::default()
    }

    #[test]
    fn test_latest_of_two_blocks() {
        let plain = "\
⏺ first answer
  more of the first
> next question
⏺ second answer
  second detail
╭──────────╮";
        let block = extractor().latest_reply(plain);
        assert_eq!(block.lines, vec!["second answer", "second detail"]);
    }

    #[test]
    fn test_open_block_at_end_is_latest() {
        let plain = "⏺ done\n\n  with a blank line between";
        assert_eq!(
            extractor().latest_reply(plain).text(),
            "done\nwith a blank line between"
        );
    }

    #[test]
    fn test_reopened_block_discards_previous() {
        let plain = "● tool call\n● final words";
        assert_eq!(extractor().latest_reply(plain).text(), "final words");
    }

    #[test]
    fn test_no_marker_is_empty() {
        assert!(extractor().latest_reply("just some shell output").is_empty());
        assert!(extractor().latest_reply("").is_empty());
    }

    #[test]
    fn test_lines_before_any_marker_are_ignored() {
        let plain = "banner\n> prompt\n⏺ reply";
        assert_eq!(extractor().latest_reply(plain).text(), "reply");
    }

    #[test]
    fn test_reply_after_missing_marker_is_empty() {
        let plain = "⏺ something\n> other";
        assert!(extractor().reply_after(plain, "hello").is_empty());
    }

    #[test]
    fn test_reply_after_uses_last_echo() {
        let plain = "\
> hello
⏺ old reply
> hello
⏺ new reply
  continues";
        let block = extractor().reply_after(plain, "hello");
        assert_eq!(block.text(), "new reply\ncontinues");
    }

    #[test]
    fn test_reply_after_ignores_blocks_before_echo() {
        let plain = "⏺ before\n> ask it";
        assert!(extractor().reply_after(plain, "ask it").is_empty());
    }

    #[test]
    fn test_long_marker_matches_on_its_tail() {
        let command = "please summarize the quarterly report and list the open risks";
        // The input box scrolled, so only the end of the command is echoed.
        let plain = "> …quarterly report and list the open risks\n⏺ Summary";
        let block = extractor().reply_after(plain, command);
        assert_eq!(block.text(), "Summary");
    }

    #[test]
    fn test_echo_needle() {
        assert_eq!(echo_needle("  short  "), "short");
        assert_eq!(echo_needle("line one\nline two"), "line two");
        let long = "x".repeat(40) + "END";
        assert_eq!(echo_needle(&long).chars().count(), MARKER_TAIL_CHARS);
        assert!(echo_needle(&long).ends_with("END"));
        assert_eq!(echo_needle("ééééééééééééééééééééééééééééééééééé").chars().count(), 32);
    }

    #[test]
    fn test_custom_markers() {
        let markers = MarkerSet {
            reply: vec!["A:".to_string()],
            boundary: vec!["Q:".to_string()],
        };
        let plain = "Q: hi\nA: hello\nQ: bye";
        assert_eq!(MarkerExtractor::new(markers).latest_reply(plain).text(), "hello");
    }

    #[test]
    fn test_limit_falls_back_to_tail() {
        let limits = ReplyLimits {
            max_lines: 2,
            max_chars: 100,
        };
        let plain = "one\ntwo\nthree";
        assert_eq!(
            limit_reply_size(&ReplyBlock::default(), plain, &limits),
            "two\nthree"
        );
        assert_eq!(limit_reply_size(&ReplyBlock::default(), "", &limits), NO_OUTPUT);
    }

    #[test]
    fn test_limit_keeps_tail_characters() {
        let limits = ReplyLimits {
            max_lines: 40,
            max_chars: 5,
        };
        let block = ReplyBlock {
            lines: vec!["abcdefgh".to_string()],
        };
        assert_eq!(limit_reply_size(&block, "", &limits), "defgh");
    }

    #[test]
    fn test_limit_is_idempotent_within_caps() {
        let limits = ReplyLimits {
            max_lines: 3,
            max_chars: 20,
        };
        let plain = "a\nb\nc\nd\ne";
        let once = limit_reply_size(&ReplyBlock::default(), plain, &limits);
        let twice = limit_reply_size(&ReplyBlock::default(), &once, &limits);
        assert_eq!(once, twice);
    }
}
