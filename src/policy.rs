use std::path::{Path, PathBuf};

use crate::config::ConflictPolicy;

/// `path` with a numeric suffix: `stem_N.ext` for files, `name_N` for
/// directories.
pub fn numbered(path: &Path, n: usize, is_dir: bool) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let renamed = match (is_dir, path.extension(), path.file_stem()) {
        (false, Some(ext), Some(stem)) => {
            format!("{}_{}.{}", stem.to_string_lossy(), n, ext.to_string_lossy())
        }
        _ => format!("{}_{}", name, n),
    };
    path.with_file_name(renamed)
}

/// First free variant of `path`, counting up from 1.
///
/// Returns `path` itself when it is not taken. The result depends only on
/// `taken`, so the same collision always resolves to the same name.
pub fn unique_path(path: &Path, is_dir: bool, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(path) {
        return path.to_path_buf();
    }
    (1..)
        .map(|n| numbered(path, n, is_dir))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// What to do with a destination that turned out to be occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Destination is free.
    Clear,
    /// Use this free variant instead.
    Renamed(PathBuf),
    /// Leave the source where it is.
    Skip,
    /// Move the occupant aside, then take its place.
    Replace,
}

/// Apply `policy` to `destination`, checking occupancy through `exists`.
pub fn resolve_conflict(
    policy: ConflictPolicy,
    destination: &Path,
    is_dir: bool,
    exists: impl Fn(&Path) -> bool,
) -> Resolution {
    if !exists(destination) {
        return Resolution::Clear;
    }
    match policy {
        ConflictPolicy::Rename => Resolution::Renamed(unique_path(destination, is_dir, exists)),
        ConflictPolicy::Skip => Resolution::Skip,
        ConflictPolicy::Overwrite => Resolution::Replace,
    }
}
