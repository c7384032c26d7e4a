//! Append-only audit log.
//!
//! One JSON object per line, one file per calendar day
//! (`audit_YYYYMMDD.jsonl`). Records are never rewritten or deleted.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// A single audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// When the operation finished (RFC 3339, local time).
    pub timestamp: String,
    /// Who asked for it.
    pub caller_id: String,
    /// What was asked.
    pub command: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Human-readable outcome or failure reason.
    pub result_summary: String,
}

/// Writer for the daily audit files.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    /// Create an audit log writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the audit file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("audit_{}.jsonl", date.format("%Y%m%d")))
    }

    /// Append one record to today's file.
    ///
    /// Best effort: a write failure is logged and swallowed so it can never
    /// abort or alter the caller's operation.
    pub fn record(&self, caller_id: &str, command: &str, success: bool, result_summary: &str) {
        let now = Local::now();
        let record = AuditRecord {
            timestamp: now.to_rfc3339(),
            caller_id: caller_id.to_string(),
            command: command.to_string(),
            success,
            result_summary: result_summary.to_string(),
        };

        if let Err(e) = self.append(&record, now) {
            tracing::warn!("Failed to write audit record to {}: {}", self.dir.display(), e);
        }

        tracing::info!(
            caller = caller_id,
            success,
            "Audited command {:?}",
            command
        );
    }

    fn append(&self, record: &AuditRecord, now: DateTime<Local>) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(now.date_naive()))?;
        // A single write keeps concurrent appends line-atomic.
        file.write_all(line.as_bytes())
    }

    /// Read back every record in the file for `date`.
    ///
    /// Malformed lines are skipped.
    pub fn read_day(&self, date: NaiveDate) -> std::io::Result<Vec<AuditRecord>> {
        let content = match std::fs::read_to_string(self.path_for(date)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_json_lines() {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(temp.path());

        log.record("42", "summarize", true, "done");
        log.record("42", "sudo ls", false, "blocked");

        let today = Local::now().date_naive();
        let records = log.read_day(today).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].caller_id, "42");
        assert!(records[0].success);
        assert_eq!(records[1].command, "sudo ls");
        assert!(!records[1].success);
        assert_eq!(records[1].result_summary, "blocked");
    }

    #[test]
    fn test_record_field_names() {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(temp.path());
        log.record("7", "hello", true, "ok");

        let raw = std::fs::read_to_string(log.path_for(Local::now().date_naive())).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        for key in ["timestamp", "callerId", "command", "success", "resultSummary"] {
            assert!(value.get(key).is_some(), "missing {key} in {raw}");
        }
    }

    #[test]
    fn test_daily_file_name() {
        let log = AuditLog::new("/var/log/helmsman");
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(
            log.path_for(date),
            PathBuf::from("/var/log/helmsman/audit_20260309.jsonl")
        );
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(temp.path().join("nested/audit"));
        log.record("1", "cmd", true, "");
        assert_eq!(log.read_day(Local::now().date_naive()).unwrap().len(), 1);
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let temp = tempfile::tempdir().unwrap();
        // A regular file where the directory should be makes every write fail
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let log = AuditLog::new(&blocker);

        log.record("1", "cmd", false, "whatever");

        assert!(log.read_day(Local::now().date_naive()).is_err());
    }
}
