//! Build the file inventory for one root.
//!
//! Only the root's immediate entries are considered for classification.
//! Managed directories (the tool's own output) are walked in full so drifted
//! content is re-organized. Unmanaged top-level directories are reported as
//! units; their files are hashed only so they can take part in duplicate
//! detection.

use chrono::{DateTime, Utc};
use glob::Pattern;
use path_absolutize::Absolutize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classify::{Classifier, FileFacts};
use crate::config::{Config, LOCAL_CONFIG_FILE};
use crate::error::ScanError;
use crate::hashing;
use crate::model::{FileRecord, Origin, SkippedEntry};
use crate::resolve::{LinkTarget, resolve_link};

/// An unmanaged top-level directory, relocated as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDirectory {
    pub path: PathBuf,
    pub name: String,
    /// Total bytes of regular files below it.
    pub size: u64,
}

/// Everything one scan pass found.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Canonical root.
    pub root: PathBuf,
    /// Files in discovery order.
    pub records: Vec<FileRecord>,
    /// Unmanaged top-level directories, in name order.
    pub directories: Vec<ScannedDirectory>,
    pub skipped: Vec<SkippedEntry>,
    pub warnings: Vec<String>,
}

/// A file found during discovery, not yet hashed.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative: PathBuf,
    origin: Origin,
    size: u64,
    modified: DateTime<Utc>,
}

/// Compiled ignore rules.
#[derive(Debug, Clone)]
struct IgnoreRules {
    patterns: Vec<Pattern>,
    hidden: bool,
}

impl IgnoreRules {
    fn compile(config: &Config) -> Result<Self, ScanError> {
        let patterns = config
            .ignore_patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|e| ScanError::InvalidPattern {
                    pattern: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            patterns,
            hidden: config.ignore_hidden,
        })
    }

    /// Cause for ignoring an entry, if any.
    fn reason(&self, relative: &Path) -> Option<&'static str> {
        let name = relative.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.hidden && name.starts_with('.') {
            return Some("hidden");
        }
        let matched = self
            .patterns
            .iter()
            .any(|p| p.matches_path(relative) || p.matches(name));
        matched.then_some("ignore pattern")
    }
}

/// Walks a root and produces [`FileRecord`]s.
pub struct Scanner<'a> {
    config: &'a Config,
    classifier: &'a Classifier,
    ignore: IgnoreRules,
}

impl<'a> Scanner<'a> {
    pub fn new(config: &'a Config, classifier: &'a Classifier) -> Result<Self, ScanError> {
        Ok(Self {
            config,
            classifier,
            ignore: IgnoreRules::compile(config)?,
        })
    }

    /// Scan `root`. Fails only when the root itself is unusable; problems with
    /// individual entries end up in [`ScanOutcome::skipped`].
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome, ScanError> {
        let root = canonical_root(root)?;
        info!("scanning {}", root.display());

        let mut entries: Vec<fs::DirEntry> = fs::read_dir(&root)
            .map_err(|source| ScanError::Unreadable {
                path: root.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut outcome = ScanOutcome {
            root: root.clone(),
            ..ScanOutcome::default()
        };
        let mut candidates = Vec::new();
        let walk_unmanaged = self.config.detect_duplicates && self.config.isolate_duplicates;
        let duplicates_dir = self.config.duplicates_dir_name();
        let folders_dir = self.config.folders_dir_name();

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let relative = PathBuf::from(&name);

            if name == self.config.log_directory || name == LOCAL_CONFIG_FILE {
                continue;
            }
            if let Some(reason) = self.ignore.reason(&relative) {
                debug!("skipping {} ({})", relative.display(), reason);
                outcome.skipped.push(skipped(&relative, reason));
                continue;
            }

            let Some((is_dir, meta)) = self.inspect(&root, &path, &relative, &mut outcome) else {
                continue;
            };

            if !is_dir {
                candidates.push(candidate(path, relative, Origin::Loose, &meta));
                continue;
            }

            if name == duplicates_dir {
                self.walk(&root, &path, Origin::Isolated, &mut candidates, &mut outcome);
            } else if name == folders_dir {
                if walk_unmanaged {
                    self.walk(&root, &path, Origin::Foldered, &mut candidates, &mut outcome);
                }
            } else if self.config.is_managed_name(&name) {
                self.walk(&root, &path, Origin::Managed, &mut candidates, &mut outcome);
            } else {
                outcome.directories.push(ScannedDirectory {
                    size: tree_size(&path),
                    path: path.clone(),
                    name,
                });
                if walk_unmanaged {
                    self.walk(&root, &path, Origin::Foldered, &mut candidates, &mut outcome);
                }
            }
        }

        for result in self.hash_all(&candidates) {
            match result {
                Ok(record) => outcome.records.push(record),
                Err(entry) => outcome.skipped.push(entry),
            }
        }

        info!(
            "scan found {} file(s), {} folder(s), skipped {}",
            outcome.records.len(),
            outcome.directories.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Stat an entry, applying the symlink policy. Returns whether it is a
    /// directory plus the metadata to use, or `None` when it is excluded.
    fn inspect(
        &self,
        root: &Path,
        path: &Path,
        relative: &Path,
        outcome: &mut ScanOutcome,
    ) -> Option<(bool, fs::Metadata)> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("cannot stat {}: {}", path.display(), e);
                outcome.skipped.push(skipped(relative, &format!("unreadable: {}", e)));
                return None;
            }
        };
        if !meta.file_type().is_symlink() {
            return Some((meta.is_dir(), meta));
        }

        if !self.config.follow_symlinks {
            debug!("skipping symlink {}", relative.display());
            outcome.skipped.push(skipped(relative, "symlink"));
            return None;
        }
        let resolved = resolve_link(root, path);
        if let Some(message) = resolved.describe(relative) {
            warn!("{}", message);
            outcome.warnings.push(message.clone());
            outcome.skipped.push(skipped(relative, &message));
            return None;
        }
        match resolved {
            LinkTarget::Inside { is_dir: true, .. } => {
                outcome.skipped.push(skipped(relative, "symlinked directory"));
                None
            }
            LinkTarget::Inside { target, .. } => match fs::metadata(&target) {
                Ok(meta) => Some((false, meta)),
                Err(e) => {
                    outcome.skipped.push(skipped(relative, &format!("unreadable: {}", e)));
                    None
                }
            },
            _ => None,
        }
    }

    /// Recursively collect files below `dir`, sorted by name at each level.
    fn walk(
        &self,
        root: &Path,
        dir: &Path,
        origin: Origin,
        candidates: &mut Vec<Candidate>,
        outcome: &mut ScanOutcome,
    ) {
        let mut pruned = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                let relative = relative_to(root, entry.path());
                match self.ignore.reason(&relative) {
                    Some(reason) => {
                        pruned.push(skipped(&relative, reason));
                        false
                    }
                    None => true,
                }
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                    warn!("cannot read {}: {}", path.display(), e);
                    found.push(Err(skipped(&relative_to(root, &path), &format!("unreadable: {}", e))));
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            found.push(Ok(entry.into_path()));
        }
        outcome.skipped.append(&mut pruned);

        for item in found {
            let path = match item {
                Ok(path) => path,
                Err(entry) => {
                    outcome.skipped.push(entry);
                    continue;
                }
            };
            let relative = relative_to(root, &path);
            if let Some(reason) = self.ignore.reason(&relative) {
                debug!("skipping {} ({})", relative.display(), reason);
                outcome.skipped.push(skipped(&relative, reason));
                continue;
            }
            if let Some((false, meta)) = self.inspect(root, &path, &relative, outcome) {
                candidates.push(candidate(path, relative, origin, &meta));
            }
        }
    }

    fn hash_one(&self, c: &Candidate) -> Result<FileRecord, SkippedEntry> {
        let hash = hashing::hash_file(&c.path, self.config.hash_algorithm, self.config.hash_block_size)
            .map_err(|e| {
                warn!("cannot hash {}: {}", c.path.display(), e);
                skipped(&c.relative, &format!("unreadable: {}", e))
            })?;
        let classification = self.classifier.classify(&FileFacts {
            path: &c.path,
            size: c.size,
            modified: c.modified,
        });
        Ok(FileRecord {
            path: c.path.clone(),
            relative: c.relative.clone(),
            size: c.size,
            modified: c.modified,
            hash,
            classification,
            origin: c.origin,
        })
    }

    #[cfg(feature = "parallel")]
    fn hash_all(&self, candidates: &[Candidate]) -> Vec<Result<FileRecord, SkippedEntry>> {
        use rayon::prelude::*;

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers.max(1))
            .build()
        {
            // Indexed collect keeps discovery order regardless of completion order.
            Ok(pool) => pool.install(|| candidates.par_iter().map(|c| self.hash_one(c)).collect()),
            Err(e) => {
                warn!("cannot start hashing pool, hashing sequentially: {}", e);
                candidates.iter().map(|c| self.hash_one(c)).collect()
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn hash_all(&self, candidates: &[Candidate]) -> Vec<Result<FileRecord, SkippedEntry>> {
        candidates.iter().map(|c| self.hash_one(c)).collect()
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, ScanError> {
    let absolute = root
        .absolutize()
        .map_err(|source| ScanError::Unreadable {
            path: root.to_path_buf(),
            source,
        })?
        .into_owned();
    if !absolute.exists() {
        return Err(ScanError::RootMissing(absolute));
    }
    let canonical = absolute
        .canonicalize()
        .map_err(|source| ScanError::Unreadable {
            path: absolute.clone(),
            source,
        })?;
    if !canonical.is_dir() {
        return Err(ScanError::NotADirectory(canonical));
    }
    Ok(canonical)
}

fn candidate(path: PathBuf, relative: PathBuf, origin: Origin, meta: &fs::Metadata) -> Candidate {
    let modified = meta
        .modified()
        .unwrap_or(std::time::UNIX_EPOCH);
    let modified = DateTime::<Utc>::from(modified);
    Candidate {
        path,
        relative,
        origin,
        size: meta.len(),
        modified,
    }
}

fn skipped(relative: &Path, reason: &str) -> SkippedEntry {
    SkippedEntry {
        path: relative.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Sum of regular file sizes below `dir`, symlinks not followed.
pub fn tree_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
