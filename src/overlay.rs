//! A filesystem view with pending changes layered on top.
//!
//! The executor asks every existence and listing question through an
//! [`Overlay`]. In a live run nothing is recorded and every query reaches the
//! disk directly. In a dry run each simulated change is recorded, and queries
//! trace a path backwards through the recorded changes to the real entry it
//! would have come from.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
enum Change {
    Moved { from: PathBuf, to: PathBuf },
    Created(PathBuf),
    Removed(PathBuf),
}

/// Where a path's content would come from.
enum Trace {
    Real(PathBuf),
    CreatedDir,
    Gone,
}

#[derive(Debug, Clone, Default)]
pub struct Overlay {
    changes: Vec<Change>,
}

fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(from).ok()?;
    if rest.as_os_str().is_empty() {
        Some(to.to_path_buf())
    } else {
        Some(to.join(rest))
    }
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_move(&mut self, from: &Path, to: &Path) {
        self.changes.push(Change::Moved {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }

    pub fn record_create_dir(&mut self, path: &Path) {
        self.changes.push(Change::Created(path.to_path_buf()));
    }

    pub fn record_remove(&mut self, path: &Path) {
        self.changes.push(Change::Removed(path.to_path_buf()));
    }

    fn trace(&self, path: &Path) -> Trace {
        let mut current = path.to_path_buf();
        for change in self.changes.iter().rev() {
            match change {
                Change::Moved { from, to } => {
                    if let Some(origin) = rebase(&current, to, from) {
                        current = origin;
                    } else if current.starts_with(from) {
                        return Trace::Gone;
                    }
                }
                Change::Created(dir) => {
                    if current == *dir {
                        return Trace::CreatedDir;
                    }
                    if current.starts_with(dir) {
                        return Trace::Gone;
                    }
                }
                Change::Removed(removed) => {
                    if current.starts_with(removed) {
                        return Trace::Gone;
                    }
                }
            }
        }
        Trace::Real(current)
    }

    pub fn kind(&self, path: &Path) -> Option<EntryKind> {
        match self.trace(path) {
            Trace::Real(real) => fs::symlink_metadata(real).ok().map(|m| {
                if m.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                }
            }),
            Trace::CreatedDir => Some(EntryKind::Dir),
            Trace::Gone => None,
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.kind(path).is_some()
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.kind(path) == Some(EntryKind::Dir)
    }

    /// Entries directly inside `dir`, sorted.
    pub fn list(&self, dir: &Path) -> Vec<PathBuf> {
        let mut candidates = BTreeSet::new();
        if let Trace::Real(real) = self.trace(dir)
            && let Ok(entries) = fs::read_dir(&real)
        {
            for entry in entries.filter_map(Result::ok) {
                candidates.insert(dir.join(entry.file_name()));
            }
        }

        for (i, change) in self.changes.iter().enumerate() {
            let appeared = match change {
                Change::Moved { to, .. } => to,
                Change::Created(path) => path,
                Change::Removed(_) => continue,
            };
            let mut current = appeared.clone();
            for later in &self.changes[i + 1..] {
                if let Change::Moved { from, to } = later
                    && let Some(moved) = rebase(&current, from, to)
                {
                    current = moved;
                }
            }
            if let Some(child) = current
                .ancestors()
                .find(|a| a.parent() == Some(dir))
            {
                candidates.insert(child.to_path_buf());
            }
        }

        candidates.into_iter().filter(|p| self.exists(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_view_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        let overlay = Overlay::new();
        assert_eq!(overlay.kind(&dir.path().join("a")), Some(EntryKind::File));
        assert!(!overlay.exists(&dir.path().join("b")));
        assert_eq!(overlay.list(dir.path()), vec![dir.path().join("a")]);
    }

    #[test]
    fn simulated_moves_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), b"b").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();

        let mut overlay = Overlay::new();
        overlay.record_create_dir(&root.join("all_Docs"));
        overlay.record_move(&root.join("a.txt"), &root.join("all_Docs/a.txt"));
        overlay.record_move(&root.join("sub/b.txt"), &root.join("all_Docs/b.txt"));
        overlay.record_move(&root.join("sub"), &root.join("all_Docs/sub"));

        assert!(!overlay.exists(&root.join("a.txt")));
        assert!(!overlay.exists(&root.join("sub")));
        assert!(overlay.is_dir(&root.join("all_Docs")));
        assert!(overlay.is_dir(&root.join("all_Docs/sub")));
        assert!(overlay.list(&root.join("all_Docs/sub")).is_empty());
        assert_eq!(
            overlay.list(&root.join("all_Docs")),
            vec![
                root.join("all_Docs/a.txt"),
                root.join("all_Docs/b.txt"),
                root.join("all_Docs/sub"),
            ]
        );
        assert_eq!(overlay.list(root), vec![root.join("all_Docs")]);

        overlay.record_remove(&root.join("all_Docs/sub"));
        assert!(!overlay.exists(&root.join("all_Docs/sub")));

        // The disk never changed.
        assert!(root.join("a.txt").exists());
        assert!(!root.join("all_Docs").exists());
    }
}
