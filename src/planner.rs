//! Turn a scan into an ordered, deterministic [`OrganizationPlan`].
//!
//! Operations are emitted in three passes: `classify` for primaries (in
//! discovery order), `isolate-duplicate` for the remaining members of each
//! duplicate set, then `relocate-subdirectory` for unmanaged top-level
//! folders. Isolation runs before relocation so a duplicate inside a folder
//! leaves the folder before the folder moves.
//!
//! Destinations are resolved against every path already on disk plus every
//! destination already handed out, so the plan never targets the same path
//! twice.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, ConflictPolicy};
use crate::hashing::ContentHash;
use crate::model::{
    DuplicateSet, FileRecord, MoveOperation, OpKind, OpState, OrganizationPlan, Origin,
    PlanSummary, SkippedEntry,
};
use crate::policy::unique_path;
use crate::scanner::ScanOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Primary,
    Extra,
}

/// Builds plans for one configuration.
pub struct Planner<'a> {
    config: &'a Config,
}

/// Mutable state of one planning pass.
struct Draft {
    root: PathBuf,
    assigned: HashSet<PathBuf>,
    operations: Vec<MoveOperation>,
    skipped: Vec<SkippedEntry>,
}

impl Draft {
    fn taken(&self, path: &Path) -> bool {
        self.assigned.contains(path) || path.symlink_metadata().is_ok()
    }

    fn push(&mut self, kind: OpKind, source: &Path, destination: PathBuf, size: u64, hash: Option<&ContentHash>) {
        debug!("plan {} {} -> {}", kind, source.display(), destination.display());
        self.assigned.insert(destination.clone());
        self.operations.push(MoveOperation {
            seq: 0,
            kind,
            source: source.to_path_buf(),
            destination,
            size,
            hash: hash.cloned(),
            state: OpState::Pending,
            final_destination: None,
        });
    }

    fn skip(&mut self, path: &Path, reason: String) {
        debug!("not moving {}: {}", path.display(), reason);
        let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        self.skipped.push(SkippedEntry { path: relative, reason });
    }
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Group records by content and pick each set's primary.
    pub fn duplicate_sets<'r>(&self, records: &'r [FileRecord]) -> Vec<DuplicateSet<'r>> {
        if !self.config.detect_duplicates {
            return records
                .iter()
                .map(|r| DuplicateSet::new(&r.hash, vec![r]))
                .collect();
        }
        let mut groups: BTreeMap<&ContentHash, Vec<&FileRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(&record.hash).or_default().push(record);
        }
        groups
            .into_iter()
            .map(|(hash, members)| DuplicateSet::new(hash, members))
            .collect()
    }

    /// Category destination for a record.
    pub fn classify_destination(&self, root: &Path, record: &FileRecord) -> PathBuf {
        let class = &record.classification;
        let name = record.path.file_name().unwrap_or(record.path.as_os_str());
        root.join(self.config.managed_name(&class.category))
            .join(&class.subcategory)
            .join(name)
    }

    pub fn plan(&self, scan: &ScanOutcome) -> OrganizationPlan {
        let root = scan.root.clone();
        let sets = self.duplicate_sets(&scan.records);

        let mut roles: HashMap<&Path, Role> = HashMap::new();
        let mut summary = PlanSummary {
            files_scanned: scan.records.len(),
            ..PlanSummary::default()
        };
        for set in &sets {
            roles.insert(&set.primary().path, Role::Primary);
            for extra in set.extras() {
                roles.insert(&extra.path, Role::Extra);
            }
            if set.is_duplicate() {
                summary.duplicate_sets += 1;
                summary.duplicate_files += set.extras().len();
                summary.bytes_recoverable += set.bytes_recoverable();
            }
        }
        let role = |r: &FileRecord| roles.get(r.path.as_path()).copied().unwrap_or(Role::Primary);
        let isolating = self.config.detect_duplicates && self.config.isolate_duplicates;

        // Without isolation, extras are classified like any other file and
        // duplicate sets only feed the summary.
        let classify: Vec<(&FileRecord, PathBuf)> = scan
            .records
            .iter()
            .filter(|r| matches!(r.origin, Origin::Loose | Origin::Managed))
            .filter(|r| !isolating || role(r) == Role::Primary)
            .map(|r| (r, self.classify_destination(&root, r)))
            .collect();

        // Scanned paths that will be vacated by some operation.
        let mut leaving: HashSet<&Path> = classify
            .iter()
            .filter(|(r, dst)| r.path != *dst)
            .map(|(r, _)| r.path.as_path())
            .collect();
        if isolating {
            leaving.extend(
                scan.records
                    .iter()
                    .filter(|r| role(r) == Role::Extra && r.origin != Origin::Isolated)
                    .map(|r| r.path.as_path()),
            );
        }

        let mut draft = Draft {
            root: root.clone(),
            assigned: HashSet::new(),
            operations: Vec::new(),
            skipped: Vec::new(),
        };

        for (record, destination) in classify {
            if record.path == destination {
                debug!("{} already in place", record.relative.display());
                continue;
            }
            if !draft.taken(&destination) {
                draft.push(OpKind::Classify, &record.path, destination, record.size, Some(&record.hash));
                continue;
            }
            let occupant_stays =
                !draft.assigned.contains(&destination) && !leaving.contains(destination.as_path());
            match self.config.conflict_resolution {
                ConflictPolicy::Skip => {
                    draft.skip(&record.path, format!("destination {} is taken", destination.display()));
                }
                ConflictPolicy::Overwrite if occupant_stays => {
                    draft.push(OpKind::Classify, &record.path, destination, record.size, Some(&record.hash));
                }
                ConflictPolicy::Rename | ConflictPolicy::Overwrite => {
                    let renamed = unique_path(&destination, false, |p| draft.taken(p));
                    draft.push(OpKind::Classify, &record.path, renamed, record.size, Some(&record.hash));
                }
            }
        }

        if isolating {
            let duplicates_root = root.join(self.config.duplicates_dir_name());
            for record in &scan.records {
                if role(record) != Role::Extra || record.origin == Origin::Isolated {
                    continue;
                }
                let destination = unique_path(&duplicates_root.join(&record.relative), false, |p| {
                    draft.taken(p)
                });
                draft.push(
                    OpKind::IsolateDuplicate,
                    &record.path,
                    destination,
                    record.size,
                    Some(&record.hash),
                );
            }
        }

        let folders_root = root.join(self.config.folders_dir_name());
        for dir in &scan.directories {
            let destination = unique_path(&folders_root.join(&dir.name), true, |p| draft.taken(p));
            draft.push(OpKind::RelocateSubdirectory, &dir.path, destination, dir.size, None);
        }

        let mut operations = draft.operations;
        for (seq, op) in operations.iter_mut().enumerate() {
            op.seq = seq;
            match op.kind {
                OpKind::Classify => summary.classify_operations += 1,
                OpKind::IsolateDuplicate => summary.isolate_operations += 1,
                OpKind::RelocateSubdirectory => summary.relocate_operations += 1,
            }
        }
        let mut skipped = scan.skipped.clone();
        skipped.extend(draft.skipped);
        summary.skipped = skipped.len();

        info!(
            "planned {} operation(s): {} classify, {} isolate, {} relocate",
            operations.len(),
            summary.classify_operations,
            summary.isolate_operations,
            summary.relocate_operations
        );
        OrganizationPlan {
            root,
            operations,
            summary,
            skipped,
            warnings: scan.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::scanner::Scanner;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;

    fn build(root: &Path, config: &Config) -> OrganizationPlan {
        let classifier = Classifier::from_config(config).unwrap();
        let scan = Scanner::new(config, &classifier).unwrap().scan(root).unwrap();
        Planner::new(config).plan(&scan)
    }

    fn moves(plan: &OrganizationPlan) -> Vec<(OpKind, String, String)> {
        plan.operations
            .iter()
            .map(|op| {
                (
                    op.kind,
                    op.source.strip_prefix(&plan.root).unwrap().display().to_string(),
                    op.destination.strip_prefix(&plan.root).unwrap().display().to_string(),
                )
            })
            .collect()
    }

    fn write(root: &Path, rel: &str, body: &[u8], mtime: i64) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    #[test]
    fn duplicate_in_folder_is_isolated_before_folder_moves() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let body = vec![b'x'; 100];
        write(root, "a.txt", &body, 1_000);
        write(root, "sub/b.txt", &body, 2_000);
        write(root, "photo.jpg", b"jpeg", 1_000);

        let plan = build(root, &Config::default());
        assert_eq!(
            moves(&plan),
            vec![
                (OpKind::Classify, "a.txt".into(), "all_Docs/Text/a.txt".into()),
                (OpKind::Classify, "photo.jpg".into(), "all_Pics/Photos/photo.jpg".into()),
                (OpKind::IsolateDuplicate, "sub/b.txt".into(), "all_Duplicates/sub/b.txt".into()),
                (OpKind::RelocateSubdirectory, "sub".into(), "all_Folders/sub".into()),
            ]
        );
        assert_eq!(plan.summary.duplicate_sets, 1);
        assert_eq!(plan.summary.bytes_recoverable, 100);
        let seqs: Vec<usize> = plan.operations.iter().map(|op| op.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn files_already_in_place_produce_no_operations() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "all_Docs/PDFs/report.pdf", b"%PDF", 1_000);
        let plan = build(dir.path(), &Config::default());
        assert!(plan.is_empty());
        assert_eq!(plan.summary.files_scanned, 1);
    }

    #[test]
    fn same_name_different_content_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "all_Docs/Text/notes.txt", b"old", 1_000);
        write(root, "notes.txt", b"new", 2_000);

        let plan = build(root, &Config::default());
        assert_eq!(
            moves(&plan),
            vec![(OpKind::Classify, "notes.txt".into(), "all_Docs/Text/notes_1.txt".into())]
        );
    }

    #[test]
    fn skip_policy_drops_colliding_moves() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "all_Docs/Text/notes.txt", b"old", 1_000);
        write(root, "notes.txt", b"new", 2_000);
        let mut config = Config::default();
        config.conflict_resolution = ConflictPolicy::Skip;

        let plan = build(root, &config);
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].path, Path::new("notes.txt"));
    }

    #[test]
    fn overwrite_policy_targets_stationary_occupant() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "all_Docs/Text/notes.txt", b"old", 1_000);
        write(root, "notes.txt", b"new", 2_000);
        let mut config = Config::default();
        config.conflict_resolution = ConflictPolicy::Overwrite;

        let plan = build(root, &config);
        assert_eq!(
            moves(&plan),
            vec![(OpKind::Classify, "notes.txt".into(), "all_Docs/Text/notes.txt".into())]
        );
    }

    #[test]
    fn isolation_disabled_classifies_extras() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.txt", b"same", 1_000);
        write(root, "b.txt", b"same", 2_000);
        let mut config = Config::default();
        config.isolate_duplicates = false;

        let plan = build(root, &config);
        assert_eq!(
            moves(&plan),
            vec![
                (OpKind::Classify, "a.txt".into(), "all_Docs/Text/a.txt".into()),
                (OpKind::Classify, "b.txt".into(), "all_Docs/Text/b.txt".into()),
            ]
        );
        assert_eq!(plan.summary.duplicate_sets, 1);
        assert_eq!(plan.summary.isolate_operations, 0);

        config.detect_duplicates = false;
        let plan = build(root, &config);
        assert_eq!(plan.operations.len(), 2);
        assert_eq!(plan.summary.duplicate_sets, 0);
    }

    #[test]
    fn folder_names_already_taken_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("all_Folders/proj")).unwrap();
        write(root, "all_Folders/proj/x.bin", b"1", 1_000);
        write(root, "proj/y.bin", b"2", 1_000);

        let plan = build(root, &Config::default());
        assert_eq!(
            moves(&plan),
            vec![(OpKind::RelocateSubdirectory, "proj".into(), "all_Folders/proj_1".into())]
        );
    }

    #[test]
    fn same_relative_names_isolate_without_collision() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.txt", b"same", 1_000);
        write(root, "x/a.txt", b"same", 1_000);
        write(root, "y/a.txt", b"same", 1_000);

        let plan = build(root, &Config::default());
        let isolated: Vec<String> = moves(&plan)
            .into_iter()
            .filter(|(k, _, _)| *k == OpKind::IsolateDuplicate)
            .map(|(_, _, d)| d)
            .collect();
        assert_eq!(isolated, vec!["all_Duplicates/x/a.txt", "all_Duplicates/y/a.txt"]);
    }
}
