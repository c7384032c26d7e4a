//! Listing of the assistant's own recent sessions.
//!
//! The assistant keeps its state in a directory (by default `~/.claude`):
//!
//! - `session-env/<id>/`: one directory per running session
//! - `sessions/<id>.json`: session metadata (`id`, `title`, `updatedAt`, `createdAt`)
//! - `history.jsonl`: prompt history, one JSON object per line

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone};
use serde::Deserialize;

use crate::outcome::{Failure, Outcome};

/// Longest title shown, in characters.
const MAX_TITLE_CHARS: usize = 80;

/// Most sessions listed at once.
const MAX_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    id: Option<String>,
    title: Option<String>,
    updated_at: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    session_id: Option<String>,
    display: Option<String>,
    timestamp: Option<f64>,
}

#[derive(Debug)]
struct HistoryHint {
    title: String,
    at: Option<DateTime<Local>>,
}

/// One listed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id.
    pub id: String,
    /// Normalized title.
    pub title: String,
    /// Last update, falling back to creation time and then directory mtime.
    pub updated: DateTime<Local>,
}

impl SessionSummary {
    /// `<id> | <title> | updated: <YYYY-MM-DDTHH>`
    pub fn line(&self) -> String {
        format!(
            "{} | {} | updated: {}",
            self.id,
            self.title,
            self.updated.format("%Y-%m-%dT%H")
        )
    }
}

/// Reads the assistant's state directory.
#[derive(Debug, Clone)]
pub struct SessionIndex {
    state_dir: PathBuf,
}

impl SessionIndex {
    /// Index the state directory at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// List up to `limit` sessions updated within the last `active_minutes`,
    /// newest first, one line per session.
    pub async fn list(&self, limit: usize, active_minutes: u64) -> Outcome {
        let state_dir = self.state_dir.clone();
        let scanned =
            tokio::task::spawn_blocking(move || scan(&state_dir, limit, active_minutes)).await;
        match scanned {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Session scan panicked: {}", e);
                Failure::unexpected("failed to read sessions").into()
            }
        }
    }
}

fn scan(state_dir: &Path, limit: usize, active_minutes: u64) -> Outcome {
    let sessions_dir = state_dir.join("sessions");
    if !sessions_dir.is_dir() {
        return Failure::unexpected(format!(
            "no session directory found at {}",
            sessions_dir.display()
        ))
        .into();
    }

    let mut sessions = match collect(state_dir) {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::error!("Failed to read sessions in {}: {}", state_dir.display(), e);
            return Failure::unexpected(format!("failed to read sessions: {e}")).into();
        }
    };
    if sessions.is_empty() {
        return Outcome::success("no running sessions");
    }

    let active_minutes = active_minutes.max(1);
    let cutoff = i64::try_from(active_minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .and_then(|window| Local::now().checked_sub_signed(window));
    sessions.retain(|s| cutoff.is_none_or(|cutoff| s.updated >= cutoff));
    if sessions.is_empty() {
        return Outcome::success(format!(
            "no sessions active in the last {active_minutes} minutes"
        ));
    }

    sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
    let lines: Vec<String> = sessions
        .iter()
        .take(limit.clamp(1, MAX_LIMIT))
        .map(SessionSummary::line)
        .collect();
    Outcome::success(lines.join("\n"))
}

/// Every running session with its best-known title and update time.
fn collect(state_dir: &Path) -> std::io::Result<Vec<SessionSummary>> {
    let env_dir = state_dir.join("session-env");
    let entries = match std::fs::read_dir(&env_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let history = read_history(&state_dir.join("history.jsonl"));
    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_dir() {
            continue;
        }
        let sid = entry.file_name().to_string_lossy().into_owned();
        let mtime = meta.modified().map(DateTime::<Local>::from).ok();
        let session_path = state_dir.join("sessions").join(format!("{sid}.json"));

        let summary = if session_path.is_file() {
            from_session_file(&sid, &session_path, mtime)
        } else {
            let hint = history.get(&sid);
            SessionSummary {
                title: normalize_title(hint.map_or("(no session file)", |h| h.title.as_str())),
                updated: hint
                    .and_then(|h| h.at)
                    .or(mtime)
                    .unwrap_or_else(Local::now),
                id: sid,
            }
        };
        sessions.push(summary);
    }
    Ok(sessions)
}

fn from_session_file(sid: &str, path: &Path, mtime: Option<DateTime<Local>>) -> SessionSummary {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<SessionFile>(&raw).map_err(|e| e.to_string()));

    match parsed {
        Ok(file) => SessionSummary {
            id: file.id.filter(|id| !id.is_empty()).unwrap_or_else(|| sid.to_string()),
            title: normalize_title(
                file.title
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .unwrap_or("(no title)"),
            ),
            updated: parse_timestamp(file.updated_at.as_deref())
                .or_else(|| parse_timestamp(file.created_at.as_deref()))
                .or(mtime)
                .unwrap_or_else(Local::now),
        },
        Err(e) => {
            tracing::warn!("Unreadable session file {}: {}", path.display(), e);
            SessionSummary {
                id: sid.to_string(),
                title: "(unreadable)".to_string(),
                updated: mtime.unwrap_or_else(Local::now),
            }
        }
    }
}

/// Last history entry per session id. An unreadable file yields no hints.
fn read_history(path: &Path) -> HashMap<String, HistoryHint> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };

    let mut hints = HashMap::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(entry) = serde_json::from_str::<HistoryEntry>(line) else {
            continue;
        };
        let Some(sid) = entry.session_id.filter(|s| !s.is_empty()) else {
            continue;
        };
        let title = entry
            .display
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "(no title)".to_string());
        let at = entry
            .timestamp
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .map(|utc| utc.with_timezone(&Local));
        hints.insert(sid, HistoryHint { title, at });
    }
    hints
}

/// Timestamps without an offset are taken as local time.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Local>> {
    let value = value?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}

/// Collapse whitespace and cap the length of a session title.
fn normalize_title(title: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.starts_with("[Pasted text") {
        return "(pasted text)".to_string();
    }
    if collapsed.chars().count() > MAX_TITLE_CHARS {
        let mut capped: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
        capped.push('…');
        capped
    } else {
        collapsed
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn state_dir() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("sessions")).unwrap();
        std::fs::create_dir_all(temp.path().join("session-env")).unwrap();
        temp
    }

    fn running(dir: &Path, id: &str) {
        std::fs::create_dir_all(dir.join("session-env").join(id)).unwrap();
    }

    fn session_file(dir: &Path, id: &str, title: &str, updated: DateTime<Local>) {
        let json = serde_json::json!({
            "id": id,
            "title": title,
            "updatedAt": updated.to_rfc3339(),
        });
        std::fs::write(
            dir.join("sessions").join(format!("{id}.json")),
            json.to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_parse_timestamp_accepts_naive_iso() {
        let expected = Local
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .earliest()
            .unwrap();
        assert_eq!(parse_timestamp(Some("2026-01-02T03:04:05")), Some(expected));
        assert_eq!(parse_timestamp(Some("2026-01-02 03:04:05")), Some(expected));
        assert_eq!(
            parse_timestamp(Some("2026-01-02T03:04:05.250"))
                .map(|dt| dt.timestamp_subsec_millis()),
            Some(250)
        );
        assert_eq!(
            parse_timestamp(Some("2026-01-02T03:04:05Z")),
            Some(DateTime::from_timestamp(1_767_323_045, 0).unwrap().with_timezone(&Local))
        );
        assert_eq!(parse_timestamp(Some("yesterday")), None);
        assert_eq!(parse_timestamp(None), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  fix\nthe   build \r"), "fix the build");
        assert_eq!(normalize_title("[Pasted text #1 +20 lines]"), "(pasted text)");
        let long = "a".repeat(100);
        let capped = normalize_title(&long);
        assert_eq!(capped.chars().count(), MAX_TITLE_CHARS + 1);
        assert!(capped.ends_with('…'));
    }

    #[tokio::test]
    async fn test_missing_state_dir_is_failure() {
        let temp = tempfile::tempdir().unwrap();
        let outcome = SessionIndex::new(temp.path()).list(10, 60).await;
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("no session directory"));
    }

    #[tokio::test]
    async fn test_no_running_sessions() {
        let temp = state_dir();
        let outcome = SessionIndex::new(temp.path()).list(10, 60).await;
        assert_eq!(outcome, Outcome::success("no running sessions"));
    }

    #[tokio::test]
    async fn test_lists_newest_first_and_filters_inactive() {
        let temp = state_dir();
        let dir = temp.path();
        let now = Local::now();

        running(dir, "old");
        session_file(dir, "old", "stale work", now - TimeDelta::hours(5));
        running(dir, "newer");
        session_file(dir, "newer", "refactor\nparser", now - TimeDelta::minutes(5));
        running(dir, "newest");
        session_file(dir, "newest", "write docs", now - TimeDelta::minutes(1));

        let outcome = SessionIndex::new(dir).list(10, 60).await;
        let message = outcome.message();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines.len(), 2, "{message}");
        assert!(lines[0].starts_with("newest | write docs | updated: "));
        assert!(lines[1].starts_with("newer | refactor parser | updated: "));

        let hour = (now - TimeDelta::minutes(1)).format("%Y-%m-%dT%H").to_string();
        assert!(lines[0].ends_with(&hour));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let temp = state_dir();
        let dir = temp.path();
        for i in 0..25 {
            let id = format!("s{i:02}");
            running(dir, &id);
            session_file(dir, &id, "t", Local::now());
        }

        let index = SessionIndex::new(dir);
        assert_eq!(index.list(0, 60).await.message().lines().count(), 1);
        assert_eq!(index.list(100, 60).await.message().lines().count(), MAX_LIMIT);
    }

    #[tokio::test]
    async fn test_falls_back_to_history() {
        let temp = state_dir();
        let dir = temp.path();
        running(dir, "h1");
        let ts = Local::now().timestamp_millis();
        let history = format!(
            "{{\"sessionId\":\"h1\",\"display\":\"first\",\"timestamp\":{ts}}}\n\
             not json\n\
             {{\"sessionId\":\"h1\",\"display\":\"[Pasted text #2]\",\"timestamp\":{ts}}}\n"
        );
        std::fs::write(dir.join("history.jsonl"), history).unwrap();

        let outcome = SessionIndex::new(dir).list(5, 10).await;
        assert!(outcome.message().starts_with("h1 | (pasted text) | updated: "));
    }

    #[tokio::test]
    async fn test_unreadable_session_file_uses_mtime() {
        let temp = state_dir();
        let dir = temp.path();
        running(dir, "bad");
        std::fs::write(dir.join("sessions/bad.json"), "{").unwrap();

        let outcome = SessionIndex::new(dir).list(5, 10).await;
        assert!(outcome.message().starts_with("bad | (unreadable) | updated: "));
    }

    #[tokio::test]
    async fn test_nothing_active() {
        let temp = state_dir();
        let dir = temp.path();
        running(dir, "old");
        session_file(dir, "old", "x", Local::now() - TimeDelta::days(2));

        let outcome = SessionIndex::new(dir).list(5, 0).await;
        assert_eq!(
            outcome,
            Outcome::success("no sessions active in the last 1 minutes")
        );
    }
}
