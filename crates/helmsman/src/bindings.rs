//! Durable caller → pinned session id map for one-shot execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from updating the session bindings file.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The session id to pin was empty.
    #[error("session id must not be empty")]
    EmptySessionId,

    /// Reading or writing the bindings file failed.
    #[error("failed to update {path}: {source}")]
    Io {
        /// Bindings file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The bindings could not be serialized.
    #[error("failed to serialize bindings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Caller → session id bindings stored as a JSON object on disk.
///
/// The file is re-read on every lookup so edits made by other processes are
/// picked up. Writes go through a temporary file and a rename.
#[derive(Debug)]
pub struct SessionBindings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionBindings {
    /// Bindings stored at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the bindings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The session id pinned for `caller_id`, if any.
    pub async fn get(&self, caller_id: &str) -> Option<String> {
        self.load().await.remove(caller_id)
    }

    /// Pin `session_id` for `caller_id`, replacing any previous binding.
    pub async fn pin(&self, caller_id: &str, session_id: &str) -> Result<(), BindingError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(BindingError::EmptySessionId);
        }

        let _guard = self.write_lock.lock().await;
        let mut bindings = self.load().await;
        bindings.insert(caller_id.to_string(), session_id.to_string());
        let json = serde_json::to_string_pretty(&bindings)?;

        let io_err = |source| BindingError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        tracing::info!("Pinned session {} for caller {}", session_id, caller_id);
        Ok(())
    }

    /// Read every binding. A missing or unreadable file reads as empty.
    async fn load(&self) -> BTreeMap<String, String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed {}: {}", self.path.display(), e);
            BTreeMap::new()
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pin_and_get() {
        let temp = tempfile::tempdir().unwrap();
        let bindings = SessionBindings::new(temp.path().join("session_bindings.json"));

        assert_eq!(bindings.get("alice").await, None);
        bindings.pin("alice", "abc-123").await.unwrap();
        bindings.pin("bob", "def-456").await.unwrap();
        bindings.pin("alice", " xyz-789 ").await.unwrap();

        assert_eq!(bindings.get("alice").await.as_deref(), Some("xyz-789"));
        assert_eq!(bindings.get("bob").await.as_deref(), Some("def-456"));
    }

    #[tokio::test]
    async fn test_rejects_empty_id() {
        let temp = tempfile::tempdir().unwrap();
        let bindings = SessionBindings::new(temp.path().join("b.json"));

        let err = bindings.pin("alice", "   ").await.unwrap_err();
        assert!(matches!(err, BindingError::EmptySessionId));
        assert!(!bindings.path().exists());
    }

    #[tokio::test]
    async fn test_rereads_file_on_every_get() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("b.json");
        let bindings = SessionBindings::new(&path);
        bindings.pin("alice", "one").await.unwrap();

        std::fs::write(&path, r#"{"alice": "edited"}"#).unwrap();
        assert_eq!(bindings.get("alice").await.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_malformed_file_reads_as_empty() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("b.json");
        std::fs::write(&path, "not json").unwrap();
        let bindings = SessionBindings::new(&path);

        assert_eq!(bindings.get("alice").await, None);
        bindings.pin("alice", "fresh").await.unwrap();
        assert_eq!(bindings.get("alice").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_file_is_a_json_object() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/b.json");
        let bindings = SessionBindings::new(&path);
        bindings.pin("42", "sess").await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["42"], "sess");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
