use std::io;
use std::path::{Component, Path, PathBuf};

/// Outcome of resolving a symlink against the scan root.
#[derive(Debug)]
pub enum LinkTarget {
    /// Resolves to a path inside the root.
    Inside { target: PathBuf, is_dir: bool },
    /// Resolves outside the root.
    Escapes(PathBuf),
    /// Resolution loops, or points at one of its own ancestors.
    Cycle,
    /// Dangling or unreadable.
    Broken(io::Error),
}

impl LinkTarget {
    /// Warning text for links that must not be followed.
    pub fn describe(&self, link: &Path) -> Option<String> {
        match self {
            LinkTarget::Inside { .. } => None,
            LinkTarget::Escapes(target) => Some(format!(
                "symlink {} escapes the root (-> {})",
                link.display(),
                target.display()
            )),
            LinkTarget::Cycle => Some(format!("symlink {} forms a cycle", link.display())),
            LinkTarget::Broken(e) => Some(format!("symlink {} cannot be resolved: {}", link.display(), e)),
        }
    }
}

/// Resolve `link` and check it stays within `root` (which must be canonical).
pub fn resolve_link(root: &Path, link: &Path) -> LinkTarget {
    let target = match link.canonicalize() {
        Ok(target) => target,
        Err(e) if is_loop(&e) => return LinkTarget::Cycle,
        Err(e) => return LinkTarget::Broken(e),
    };
    if !target.starts_with(root) {
        return LinkTarget::Escapes(target);
    }
    let is_dir = target.is_dir();
    if is_dir && link.parent().is_some_and(|parent| parent.starts_with(&target)) {
        return LinkTarget::Cycle;
    }
    LinkTarget::Inside { target, is_dir }
}

#[cfg(unix)]
fn is_loop(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ELOOP as i32)
}

#[cfg(not(unix))]
fn is_loop(_e: &io::Error) -> bool {
    false
}

/// Lexically normalize `path` (no filesystem access) and report whether it
/// stays under `root`.
pub fn is_within(root: &Path, path: &Path) -> bool {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return false;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_confinement() {
        let root = Path::new("/data/root");
        assert!(is_within(root, Path::new("/data/root/a/b")));
        assert!(is_within(root, Path::new("/data/root/a/../b")));
        assert!(!is_within(root, Path::new("/data/root/../other")));
        assert!(!is_within(root, Path::new("/data/rootless")));
    }

    #[cfg(unix)]
    #[test]
    fn classifies_links() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let outside = tempfile::tempdir().unwrap();

        std::fs::write(root.join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("inside")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();
        std::os::unix::fs::symlink(&root, root.join("up")).unwrap();
        std::os::unix::fs::symlink(root.join("missing"), root.join("dangling")).unwrap();
        std::os::unix::fs::symlink(root.join("self"), root.join("self")).unwrap();

        assert!(matches!(
            resolve_link(&root, &root.join("inside")),
            LinkTarget::Inside { is_dir: false, .. }
        ));
        assert!(matches!(resolve_link(&root, &root.join("escape")), LinkTarget::Escapes(_)));
        assert!(matches!(resolve_link(&root, &root.join("up")), LinkTarget::Cycle));
        assert!(matches!(resolve_link(&root, &root.join("dangling")), LinkTarget::Broken(_)));
        assert!(matches!(resolve_link(&root, &root.join("self")), LinkTarget::Cycle));
    }
}
