use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::HashAlgorithm;
use crate::error::OperationError;
use crate::hashing;

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Bytes written by a copy fallback; zero for a rename.
    pub bytes_copied: u64,
    pub copied: bool,
}

/// Re-hash copies before the source is removed.
#[derive(Debug, Clone, Copy)]
pub struct Verify {
    pub algorithm: HashAlgorithm,
    pub block_size: usize,
}

/// Device holding `path` (the path itself, not a symlink target).
#[cfg(unix)]
pub fn device_id(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::symlink_metadata(path)?.dev())
}

#[cfg(not(unix))]
pub fn device_id(path: &Path) -> io::Result<u64> {
    fs::symlink_metadata(path).map(|_| 0)
}

/// Whether `src` and the directory `dst_dir` share a filesystem.
pub fn same_filesystem(src: &Path, dst_dir: &Path) -> io::Result<bool> {
    Ok(device_id(src)? == device_id(dst_dir)?)
}

/// Whether entries can be created and removed in `dir`.
#[cfg(unix)]
pub fn can_write(dir: &Path) -> bool {
    use nix::unistd::{AccessFlags, access};
    access(dir, AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
}

#[cfg(not(unix))]
pub fn can_write(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(unix)]
fn crosses_devices(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(not(unix))]
fn crosses_devices(_e: &io::Error) -> bool {
    false
}

/// Create one directory level.
pub fn create_dir(path: &Path) -> Result<(), OperationError> {
    fs::create_dir(path).map_err(|e| OperationError::io("create directory", path, e))
}

/// Remove an empty directory.
pub fn remove_dir(path: &Path) -> Result<(), OperationError> {
    fs::remove_dir(path).map_err(|e| OperationError::io("remove directory", path, e))
}

/// Move a file or directory. The destination must not exist and its parent
/// must.
///
/// Renames when possible. Across filesystems (or with `force_copy`) the
/// source is copied, the copy verified, and only then the source removed; a
/// copy that fails verification is deleted and the source left untouched.
pub fn move_path(
    src: &Path,
    dst: &Path,
    force_copy: bool,
    verify: Option<Verify>,
) -> Result<MoveOutcome, OperationError> {
    let meta = fs::symlink_metadata(src).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => OperationError::SourceMissing(src.to_path_buf()),
        _ => OperationError::io("stat", src, e),
    })?;

    if !force_copy {
        let parent = dst.parent().unwrap_or_else(|| Path::new("."));
        let same = same_filesystem(src, parent).unwrap_or(true);
        if same {
            match fs::rename(src, dst) {
                Ok(()) => {
                    return Ok(MoveOutcome {
                        bytes_copied: 0,
                        copied: false,
                    });
                }
                Err(e) if crosses_devices(&e) => {
                    debug!("rename of {} crossed devices, copying", src.display());
                }
                Err(e) => return Err(OperationError::io("rename", src, e)),
            }
        }
    }

    let bytes = if meta.is_dir() {
        copy_dir_verified(src, dst)?
    } else {
        copy_file_verified(src, dst, &meta, verify)?
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(src)
    } else {
        fs::remove_file(src)
    };
    removed.map_err(|e| OperationError::io("remove source", src, e))?;
    Ok(MoveOutcome {
        bytes_copied: bytes,
        copied: true,
    })
}

fn copy_file_verified(
    src: &Path,
    dst: &Path,
    meta: &fs::Metadata,
    verify: Option<Verify>,
) -> Result<u64, OperationError> {
    let bytes = fs::copy(src, dst).map_err(|e| OperationError::io("copy", src, e))?;
    let check = || -> Result<(), OperationError> {
        if bytes != meta.len() {
            return Err(OperationError::VerificationFailed {
                path: dst.to_path_buf(),
                detail: format!("copied {} of {} bytes", bytes, meta.len()),
            });
        }
        if let Some(v) = verify {
            let expected = hashing::hash_file(src, v.algorithm, v.block_size)
                .map_err(|e| OperationError::io("hash", src, e))?;
            let actual = hashing::hash_file(dst, v.algorithm, v.block_size)
                .map_err(|e| OperationError::io("hash", dst, e))?;
            if expected != actual {
                return Err(OperationError::VerificationFailed {
                    path: dst.to_path_buf(),
                    detail: format!("expected {}, found {}", expected, actual),
                });
            }
        }
        filetime::set_file_mtime(dst, FileTime::from_last_modification_time(meta))
            .map_err(|e| OperationError::io("set modification time on", dst, e))
    };
    if let Err(e) = check() {
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    Ok(bytes)
}

fn copy_dir_verified(src: &Path, dst: &Path) -> Result<u64, OperationError> {
    fs::create_dir(dst).map_err(|e| OperationError::io("create directory", dst, e))?;
    let options = fs_extra::dir::CopyOptions {
        content_only: true,
        ..fs_extra::dir::CopyOptions::new()
    };
    let result = fs_extra::dir::copy(src, dst, &options)
        .map_err(|e| io::Error::other(e.to_string()))
        .and_then(|bytes| {
            let expected = fs_extra::dir::get_size(src).map_err(|e| io::Error::other(e.to_string()))?;
            let actual = fs_extra::dir::get_size(dst).map_err(|e| io::Error::other(e.to_string()))?;
            Ok((bytes, expected, actual))
        });
    let (bytes, expected, actual) = match result {
        Ok(sizes) => sizes,
        Err(e) => {
            let _ = fs::remove_dir_all(dst);
            return Err(OperationError::io("copy", src, e));
        }
    };
    if expected != actual {
        let _ = fs::remove_dir_all(dst);
        return Err(OperationError::VerificationFailed {
            path: dst.to_path_buf(),
            detail: format!("copied {} of {} bytes", actual, expected),
        });
    }
    preserve_mtimes(src, dst);
    Ok(bytes)
}

/// Best effort: carry file modification times over to a copied tree.
fn preserve_mtimes(src: &Path, dst: &Path) {
    for entry in WalkDir::new(src).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if let Ok(meta) = entry.metadata() {
            let _ = filetime::set_file_mtime(dst.join(rel), FileTime::from_last_modification_time(&meta));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_within_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, b"hello").unwrap();
        let outcome = move_path(&src, &dst, false, None).unwrap();
        assert!(!outcome.copied);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn failed_verification_keeps_source_and_drops_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        let longer = dir.path().join("longer.txt");
        fs::write(&src, b"hello").unwrap();
        fs::write(&longer, b"hello, world").unwrap();
        // Metadata of a different file stands in for a short copy.
        let meta = fs::metadata(&longer).unwrap();

        let err = copy_file_verified(&src, &dst, &meta, None).unwrap_err();
        assert!(matches!(err, OperationError::VerificationFailed { .. }));
        assert_eq!(fs::read(&src).unwrap(), b"hello");
        assert!(!dst.exists());
    }

    #[test]
    fn forced_copy_verifies_and_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, b"hello").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_000_000, 0)).unwrap();
        let verify = Verify {
            algorithm: HashAlgorithm::Strong,
            block_size: 2,
        };
        let outcome = move_path(&src, &dst, true, Some(verify)).unwrap();
        assert!(outcome.copied);
        assert_eq!(outcome.bytes_copied, 5);
        assert!(!src.exists());
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&dst).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_000_000);
    }

    #[test]
    fn forced_copy_of_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("proj");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/f.txt"), b"abc").unwrap();
        fs::write(src.join("g.txt"), b"de").unwrap();
        let dst = dir.path().join("moved");
        let outcome = move_path(&src, &dst, true, None).unwrap();
        assert!(outcome.copied);
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("nested/f.txt")).unwrap(), b"abc");
        assert_eq!(fs::read(dst.join("g.txt")).unwrap(), b"de");
    }

    #[test]
    fn missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_path(&dir.path().join("nope"), &dir.path().join("x"), false, None).unwrap_err();
        assert!(matches!(err, OperationError::SourceMissing(_)));
    }

    #[test]
    fn temp_dirs_are_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(can_write(dir.path()));
        assert!(same_filesystem(dir.path(), dir.path()).unwrap());
    }
}
