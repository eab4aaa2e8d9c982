use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::JournalError;
use crate::model::OpKind;

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Classify,
    IsolateDuplicate,
    RelocateSubdirectory,
    /// A missing destination parent was created.
    CreateDirectory,
    /// An empty managed directory was removed during cleanup.
    RemoveDirectory,
    /// An occupied destination was moved aside before an overwrite.
    Displace,
}

impl From<OpKind> for EntryKind {
    fn from(kind: OpKind) -> Self {
        match kind {
            OpKind::Classify => EntryKind::Classify,
            OpKind::IsolateDuplicate => EntryKind::IsolateDuplicate,
            OpKind::RelocateSubdirectory => EntryKind::RelocateSubdirectory,
        }
    }
}

/// Resulting state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Succeeded,
    Failed,
    Skipped,
    /// A later undo reversed the entry with the same id.
    Undone,
}

/// One line of the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique entry id; `undone` records reuse the id they reverse.
    pub id: Uuid,
    /// Time the entry was written (UTC, RFC 3339).
    pub ts: DateTime<Utc>,
    /// Plan operation this entry belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<usize>,
    /// What the entry records.
    pub kind: EntryKind,
    /// Moved path, or the directory created / removed.
    pub source: PathBuf,
    /// Where the source ended up; absent for directory entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// Outcome of the entry.
    pub state: EntryState,
    /// Failure message for failed or skipped entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(seq: Option<usize>, kind: EntryKind, source: &Path, destination: Option<&Path>, state: EntryState) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            seq,
            kind,
            source: source.to_path_buf(),
            destination: destination.map(Path::to_path_buf),
            state,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Record that this entry has been reversed.
    pub fn undone(&self) -> Self {
        Self {
            id: self.id,
            ts: Utc::now(),
            state: EntryState::Undone,
            error: None,
            ..self.clone()
        }
    }
}

/// Appends entries as NDJSON lines, syncing after each one.
pub struct JournalWriter {
    path: PathBuf,
    file: File,
}

impl JournalWriter {
    /// Open for appending, creating the file if needed.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| JournalError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, entry: &LogEntry) -> Result<(), JournalError> {
        let line = serde_json::to_string(entry)?;
        writeln!(&mut self.file, "{}", line)
            .and_then(|()| self.file.sync_all())
            .map_err(|source| JournalError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Read every entry, in file order.
pub fn read_journal(path: &Path) -> Result<Vec<LogEntry>, JournalError> {
    let content = std::fs::read_to_string(path).map_err(|source| JournalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| JournalError::Malformed { line: i + 1, source })
        })
        .collect()
}

/// Log file name for a run: `operations-<UTC timestamp>-<run id>.jsonl`.
pub fn log_file_name(started: DateTime<Utc>, run_id: Uuid) -> String {
    format!(
        "operations-{}-{}.jsonl",
        started.format("%Y%m%dT%H%M%SZ"),
        run_id.simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        let first = LogEntry::new(
            Some(0),
            EntryKind::Classify,
            Path::new("/r/a.txt"),
            Some(Path::new("/r/all_Docs/Text/a.txt")),
            EntryState::Succeeded,
        );
        let second = LogEntry::new(None, EntryKind::CreateDirectory, Path::new("/r/all_Docs"), None, EntryState::Failed)
            .with_error("denied");
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            writer.write(&first).unwrap();
        }
        let mut writer = JournalWriter::open(&path).unwrap();
        writer.write(&second).unwrap();
        writer.write(&first.undone()).unwrap();

        let entries = read_journal(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], first);
        assert_eq!(entries[1].error.as_deref(), Some("denied"));
        assert_eq!(entries[2].id, first.id);
        assert_eq!(entries[2].state, EntryState::Undone);
    }

    #[test]
    fn wire_format_is_snake_case() {
        let entry = LogEntry::new(None, EntryKind::RemoveDirectory, Path::new("/r/x"), None, EntryState::Succeeded);
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"kind\":\"remove_directory\""));
        assert!(line.contains("\"state\":\"succeeded\""));
        assert!(!line.contains("destination"));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        match read_journal(&path) {
            Err(JournalError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other.map(|e| e.len())),
        }
    }
}
