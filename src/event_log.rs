//! Append-only JSON-Lines journal of pipeline events.
//!
//! Each line is one object: `{"timestamp": <RFC 3339 UTC>, "event": <type>, ...fields}`.
//! Writes take an exclusive file lock for the duration of one line so
//! concurrent writers never interleave partial lines. Write failures are
//! returned to the caller.

use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StudyError, StudyResult};

/// Event type names written by the ambient poller.
pub mod events {
    pub const AMBIENT_STARTED: &str = "ambient_started";
    pub const POLL_COMPLETE: &str = "poll_complete";
    pub const POLL_ERROR: &str = "poll_error";
    pub const PROCESSING_STARTED: &str = "processing_started";
    pub const INGESTION_COMPLETE: &str = "ingestion_complete";
    pub const INGESTION_FAILED: &str = "ingestion_failed";
    pub const AGENT_COMPLETE: &str = "agent_complete";
    pub const AGENT_FAILED: &str = "agent_failed";
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. `data` must be a JSON object (or null); its
    /// fields are merged after `timestamp` and `event`.
    pub fn log(&self, event_type: &str, data: Value) -> StudyResult<()> {
        let mut entry = Map::new();
        entry.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        entry.insert("event".to_string(), Value::String(event_type.to_string()));
        match data {
            Value::Object(fields) => {
                for (k, v) in fields {
                    if k != "timestamp" && k != "event" {
                        entry.insert(k, v);
                    }
                }
            }
            Value::Null => {}
            other => {
                entry.insert("data".to_string(), other);
            }
        }

        let mut line = serde_json::to_string(&Value::Object(entry))?;
        line.push('\n');
        append_locked(&self.path, &line)
    }

    /// Up to `limit` entries, newest first. Lines that are not valid JSON
    /// objects are skipped; a missing file reads as empty.
    pub fn read_recent(&self, limit: usize) -> StudyResult<Vec<Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StudyError::persistence(&self.path, e)),
        };

        Ok(content
            .lines()
            .rev()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .filter(Value::is_object)
            .take(limit)
            .collect())
    }
}

/// Append `text` to `path` under an exclusive lock, creating the file and
/// its parent directory if needed.
pub(crate) fn append_locked(path: &Path, text: &str) -> StudyResult<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StudyError::persistence(path, e))?;

    file.lock_exclusive()
        .map_err(|e| StudyError::persistence(path, e))?;
    let written = file
        .write_all(text.as_bytes())
        .and_then(|_| file.flush());
    FileExt::unlock(&file).map_err(|e| StudyError::persistence(path, e))?;
    written.map_err(|e| StudyError::persistence(path, e))
}

pub(crate) fn ensure_parent(path: &Path) -> StudyResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StudyError::persistence(parent, e))?;
        }
    }
    Ok(())
}
