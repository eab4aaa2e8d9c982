use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::classify::Classification;
use crate::hashing::ContentHash;
use crate::journal::LogEntry;

/// Where a scanned file sits relative to the directories this tool manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Directly under the root.
    Loose,
    /// Inside a managed category directory.
    Managed,
    /// Inside the managed duplicates directory.
    Isolated,
    /// Inside an unmanaged top-level folder or the managed folders directory.
    /// Travels with its folder; never classified out of it.
    Foldered,
}

/// One scanned file. Immutable once the scanner has built it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the scan root.
    pub relative: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: ContentHash,
    pub classification: Classification,
    pub origin: Origin,
}

impl FileRecord {
    /// Sort key for primary selection; the smallest key wins.
    ///
    /// Copies already isolated rank after everything else, then shorter
    /// relative path, older modification time, lexicographic path.
    pub fn primary_key(&self) -> (bool, usize, DateTime<Utc>, &Path) {
        (
            self.origin == Origin::Isolated,
            self.relative.to_string_lossy().chars().count(),
            self.modified,
            &self.relative,
        )
    }
}

/// Files sharing one content hash, primary first.
#[derive(Debug, Clone)]
pub struct DuplicateSet<'a> {
    pub hash: &'a ContentHash,
    members: Vec<&'a FileRecord>,
}

impl<'a> DuplicateSet<'a> {
    /// Panics in debug builds on an empty member list.
    pub fn new(hash: &'a ContentHash, mut members: Vec<&'a FileRecord>) -> Self {
        debug_assert!(!members.is_empty());
        members.sort_by(|a, b| a.primary_key().cmp(&b.primary_key()));
        Self { hash, members }
    }

    pub fn primary(&self) -> &'a FileRecord {
        self.members[0]
    }

    /// Every member except the primary.
    pub fn extras(&self) -> &[&'a FileRecord] {
        &self.members[1..]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    /// Bytes freed if every extra were removed.
    pub fn bytes_recoverable(&self) -> u64 {
        self.primary().size * self.extras().len() as u64
    }
}

/// Why an operation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Classify,
    IsolateDuplicate,
    RelocateSubdirectory,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Classify => "classify",
            OpKind::IsolateDuplicate => "isolate-duplicate",
            OpKind::RelocateSubdirectory => "relocate-subdirectory",
        })
    }
}

/// Lifecycle of a planned operation: `pending -> succeeded | failed | skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

/// A single planned move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOperation {
    /// Position in the plan.
    pub seq: usize,
    pub kind: OpKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Bytes carried by the move (whole tree for folders).
    pub size: u64,
    /// Content hash of a moved file, for post-move verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(default)]
    pub state: OpState,
    /// Where the source actually went, when conflict resolution renamed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_destination: Option<PathBuf>,
}

impl MoveOperation {
    pub fn is_directory(&self) -> bool {
        self.kind == OpKind::RelocateSubdirectory
    }
}

/// An entry the scanner or planner chose not to act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Plan statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub files_scanned: usize,
    pub duplicate_sets: usize,
    pub duplicate_files: usize,
    pub bytes_recoverable: u64,
    pub classify_operations: usize,
    pub isolate_operations: usize,
    pub relocate_operations: usize,
    pub skipped: usize,
}

/// Ordered moves for one root. Built once; the executor only updates states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationPlan {
    pub root: PathBuf,
    pub operations: Vec<MoveOperation>,
    pub summary: PlanSummary,
    #[serde(default)]
    pub skipped: Vec<SkippedEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl OrganizationPlan {
    /// Plan in canonical JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A failed operation as recorded in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub seq: usize,
    pub source: PathBuf,
    pub message: String,
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationResult {
    pub run_id: Uuid,
    pub root: PathBuf,
    pub dry_run: bool,
    /// Operations the executor reached (fatal skips excluded).
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Skipped by conflict policy or by a fatal stop.
    pub skipped: usize,
    pub bytes_moved: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    #[serde(default)]
    pub errors: Vec<OperationFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    #[serde(default)]
    pub directories_created: Vec<PathBuf>,
    #[serde(default)]
    pub directories_removed: Vec<PathBuf>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl OrganizationResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.fatal.is_none()
    }

    /// Some operations failed or a fatal condition stopped the run.
    pub fn is_partial(&self) -> bool {
        !self.is_complete_success()
    }

    pub fn summary(&self, plan: &OrganizationPlan) -> RunSummary {
        RunSummary {
            root: self.root.clone(),
            dry_run: self.dry_run,
            files_scanned: plan.summary.files_scanned,
            planned: plan.operations.len(),
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            duplicate_sets: plan.summary.duplicate_sets,
            bytes_recoverable: plan.summary.bytes_recoverable,
            bytes_moved: self.bytes_moved,
            elapsed: self.duration,
        }
    }
}

/// Flat figures for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub root: PathBuf,
    pub dry_run: bool,
    pub files_scanned: usize,
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duplicate_sets: usize,
    pub bytes_recoverable: u64,
    pub bytes_moved: u64,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashAlgorithm;
    use chrono::TimeZone;

    fn record(relative: &str, secs: i64, origin: Origin) -> FileRecord {
        FileRecord {
            path: Path::new("/root").join(relative),
            relative: relative.into(),
            size: 100,
            modified: Utc.timestamp_opt(secs, 0).unwrap(),
            hash: ContentHash {
                algorithm: HashAlgorithm::Strong,
                digest: "aa".into(),
            },
            classification: Classification::fallback(),
            origin,
        }
    }

    #[test]
    fn primary_prefers_shorter_path_then_older_then_name() {
        let a = record("a.txt", 200, Origin::Loose);
        let b = record("sub/b.txt", 100, Origin::Foldered);
        let c = record("c.txt", 100, Origin::Loose);
        let hash = a.hash.clone();
        let set = DuplicateSet::new(&hash, vec![&b, &a, &c]);
        assert_eq!(set.primary().relative, Path::new("c.txt"));
        assert_eq!(set.extras().len(), 2);
        assert_eq!(set.bytes_recoverable(), 200);
    }

    #[test]
    fn identical_keys_fall_back_to_lexicographic_path() {
        let x = record("x.txt", 100, Origin::Loose);
        let y = record("y.txt", 100, Origin::Loose);
        let hash = x.hash.clone();
        let forward = DuplicateSet::new(&hash, vec![&x, &y]);
        let backward = DuplicateSet::new(&hash, vec![&y, &x]);
        assert_eq!(forward.primary().relative, backward.primary().relative);
        assert_eq!(forward.primary().relative, Path::new("x.txt"));
    }

    #[test]
    fn isolated_copies_never_beat_live_ones() {
        let isolated = record("all_Duplicates/a", 1, Origin::Isolated);
        let live = record("all_Docs/Text/very_long_name.txt", 999, Origin::Managed);
        let hash = live.hash.clone();
        let set = DuplicateSet::new(&hash, vec![&isolated, &live]);
        assert_eq!(set.primary().origin, Origin::Managed);
    }

    #[test]
    fn op_kind_display() {
        assert_eq!(OpKind::IsolateDuplicate.to_string(), "isolate-duplicate");
        assert_eq!(
            serde_json::to_string(&OpKind::RelocateSubdirectory).unwrap(),
            "\"relocate_subdirectory\""
        );
    }
}
