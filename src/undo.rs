use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, UndoError};
use crate::journal::{EntryKind, EntryState, JournalWriter, LogEntry, read_journal};
use crate::overlay::Overlay;

/// Options for [`undo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UndoOptions {
    /// Report what would be reversed without touching the disk or the log.
    pub dry_run: bool,
}

/// A reversal that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoFailure {
    /// Id of the log entry that could not be reversed.
    pub id: Uuid,
    /// Source path recorded by that entry.
    pub source: PathBuf,
    /// Why the reversal failed.
    pub message: String,
}

/// Counts for one undo run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoResult {
    /// Entries reversed by this run.
    pub reversed: usize,
    /// Entries whose reversal failed.
    pub failed: usize,
    /// Entries that were not replayed: skipped, failed or already undone.
    pub not_replayed: usize,
    /// One record per failed reversal.
    #[serde(default)]
    pub failures: Vec<UndoFailure>,
}

impl UndoResult {
    /// True when nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Reverse every succeeded entry of the log at `log_path`, newest first.
///
/// Each reversal is appended to the same log as an `undone` record, so an
/// interrupted undo can simply be run again.
pub fn undo(log_path: &Path, options: UndoOptions) -> Result<UndoResult, Error> {
    let entries = read_journal(log_path)?;
    let undone: HashSet<Uuid> = entries
        .iter()
        .filter(|e| e.state == EntryState::Undone)
        .map(|e| e.id)
        .collect();
    let mut writer = if options.dry_run {
        None
    } else {
        Some(JournalWriter::open(log_path)?)
    };
    info!(
        "{} {} ({} entries)",
        if options.dry_run { "simulating undo of" } else { "undoing" },
        log_path.display(),
        entries.len()
    );

    let mut overlay = Overlay::new();
    let mut result = UndoResult::default();
    for entry in entries.iter().rev() {
        if entry.state == EntryState::Undone {
            continue;
        }
        if entry.state != EntryState::Succeeded || undone.contains(&entry.id) {
            debug!("not replaying {:?} entry for {}", entry.state, entry.source.display());
            result.not_replayed += 1;
            continue;
        }

        match reverse(entry, &mut overlay, options.dry_run) {
            Ok(()) => {
                if let Some(writer) = &mut writer {
                    writer.write(&entry.undone())?;
                }
                result.reversed += 1;
            }
            Err(e) => {
                warn!("cannot undo {}: {}", entry.source.display(), e);
                result.failed += 1;
                result.failures.push(UndoFailure {
                    id: entry.id,
                    source: entry.source.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "undo finished: {} reversed, {} failed, {} not replayed",
        result.reversed, result.failed, result.not_replayed
    );
    Ok(result)
}

fn reverse(entry: &LogEntry, overlay: &mut Overlay, dry_run: bool) -> Result<(), UndoError> {
    match (entry.kind, &entry.destination) {
        (EntryKind::CreateDirectory, _) => {
            let dir = &entry.source;
            if !overlay.exists(dir) {
                return Err(UndoError::Missing(dir.clone()));
            }
            if dry_run {
                if !overlay.list(dir).is_empty() {
                    return Err(UndoError::Occupied(dir.clone()));
                }
                overlay.record_remove(dir);
            } else {
                fs::remove_dir(dir).map_err(|source| UndoError::Io {
                    action: "remove directory",
                    path: dir.clone(),
                    source,
                })?;
            }
            debug!("removed {}", dir.display());
            Ok(())
        }
        (EntryKind::RemoveDirectory, _) => {
            let dir = &entry.source;
            if overlay.is_dir(dir) {
                return Ok(());
            }
            create_parents(dir, overlay, dry_run)?;
            if dry_run {
                overlay.record_create_dir(dir);
                Ok(())
            } else {
                fs::create_dir(dir).map_err(|source| UndoError::Io {
                    action: "recreate directory",
                    path: dir.clone(),
                    source,
                })
            }
        }
        (_, Some(destination)) => {
            let original = &entry.source;
            if !overlay.exists(destination) {
                return Err(UndoError::Missing(destination.clone()));
            }
            if overlay.exists(original) {
                return Err(UndoError::Occupied(original.clone()));
            }
            create_parents(original, overlay, dry_run)?;
            if dry_run {
                overlay.record_move(destination, original);
            } else {
                crate::fsops::move_path(destination, original, false, None)?;
            }
            debug!("moved {} back to {}", destination.display(), original.display());
            Ok(())
        }
        (kind, None) => Err(UndoError::NoDestination {
            kind,
            path: entry.source.clone(),
        }),
    }
}

fn create_parents(path: &Path, overlay: &mut Overlay, dry_run: bool) -> Result<(), UndoError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if dry_run {
        let missing: Vec<PathBuf> = parent
            .ancestors()
            .take_while(|a| !overlay.exists(a))
            .map(Path::to_path_buf)
            .collect();
        for dir in missing.into_iter().rev() {
            overlay.record_create_dir(&dir);
        }
        Ok(())
    } else {
        fs::create_dir_all(parent).map_err(|source| UndoError::Io {
            action: "create directory",
            path: parent.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(path: &Path, entries: &[LogEntry]) {
        let mut writer = JournalWriter::open(path).unwrap();
        for entry in entries {
            writer.write(entry).unwrap();
        }
    }

    fn moved(src: &Path, dst: &Path, state: EntryState) -> LogEntry {
        LogEntry::new(Some(0), EntryKind::Classify, src, Some(dst), state)
    }

    #[test]
    fn reverses_moves_and_directories_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("all_Docs")).unwrap();
        fs::write(root.join("all_Docs/a.txt"), b"a").unwrap();
        let log = root.join("ops.jsonl");
        write_log(
            &log,
            &[
                LogEntry::new(Some(0), EntryKind::CreateDirectory, &root.join("all_Docs"), None, EntryState::Succeeded),
                moved(&root.join("a.txt"), &root.join("all_Docs/a.txt"), EntryState::Succeeded),
                moved(&root.join("b.txt"), &root.join("all_Docs/b.txt"), EntryState::Skipped),
                LogEntry::new(None, EntryKind::RemoveDirectory, &root.join("all_Empty"), None, EntryState::Succeeded),
            ],
        );

        let result = undo(&log, UndoOptions::default()).unwrap();
        assert_eq!((result.reversed, result.failed, result.not_replayed), (3, 0, 1));
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"a");
        assert!(!root.join("all_Docs").exists());
        assert!(root.join("all_Empty").is_dir());

        let entries = read_journal(&log).unwrap();
        assert_eq!(entries.iter().filter(|e| e.state == EntryState::Undone).count(), 3);
    }

    #[test]
    fn second_undo_replays_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("moved.txt"), b"x").unwrap();
        let log = root.join("ops.jsonl");
        write_log(&log, &[moved(&root.join("orig.txt"), &root.join("moved.txt"), EntryState::Succeeded)]);

        assert_eq!(undo(&log, UndoOptions::default()).unwrap().reversed, 1);
        let again = undo(&log, UndoOptions::default()).unwrap();
        assert_eq!(again.reversed, 0);
        assert_eq!(again.not_replayed, 1);
        assert!(root.join("orig.txt").exists());
    }

    #[test]
    fn occupied_source_is_refused_and_others_continue() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), b"new occupant").unwrap();
        fs::write(root.join("moved_a.txt"), b"a").unwrap();
        fs::write(root.join("moved_b.txt"), b"b").unwrap();
        let log = root.join("ops.jsonl");
        write_log(
            &log,
            &[
                moved(&root.join("a.txt"), &root.join("moved_a.txt"), EntryState::Succeeded),
                moved(&root.join("b.txt"), &root.join("moved_b.txt"), EntryState::Succeeded),
                moved(&root.join("c.txt"), &root.join("moved_c.txt"), EntryState::Succeeded),
            ],
        );

        let result = undo(&log, UndoOptions::default()).unwrap();
        assert_eq!((result.reversed, result.failed), (1, 2));
        assert!(!result.is_complete());
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"new occupant");
        assert!(root.join("b.txt").exists());
        assert!(result.failures.iter().any(|f| f.message.contains("refusing")));
        assert!(result.failures.iter().any(|f| f.message.contains("missing")));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("out")).unwrap();
        fs::write(root.join("out/a.txt"), b"a").unwrap();
        let log = root.join("ops.jsonl");
        write_log(
            &log,
            &[
                LogEntry::new(Some(0), EntryKind::CreateDirectory, &root.join("out"), None, EntryState::Succeeded),
                moved(&root.join("a.txt"), &root.join("out/a.txt"), EntryState::Succeeded),
            ],
        );
        let before = fs::read_to_string(&log).unwrap();

        let result = undo(&log, UndoOptions { dry_run: true }).unwrap();
        assert_eq!(result.reversed, 2);
        assert!(root.join("out/a.txt").exists());
        assert_eq!(fs::read_to_string(&log).unwrap(), before);
    }

    #[test]
    fn move_entry_without_destination_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("moved.txt"), b"x").unwrap();
        let log = root.join("ops.jsonl");
        write_log(
            &log,
            &[
                moved(&root.join("orig.txt"), &root.join("moved.txt"), EntryState::Succeeded),
                LogEntry::new(Some(1), EntryKind::Classify, &root.join("b.txt"), None, EntryState::Succeeded),
            ],
        );

        let result = undo(&log, UndoOptions::default()).unwrap();
        assert_eq!((result.reversed, result.failed), (1, 1));
        assert_eq!(result.failures[0].source, root.join("b.txt"));
        assert_eq!(
            result.failures[0].message,
            format!("Classify entry for {} has no destination", root.join("b.txt").display())
        );
        assert!(root.join("orig.txt").exists());
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = undo(&dir.path().join("none.jsonl"), UndoOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Journal(_)));
    }
}
