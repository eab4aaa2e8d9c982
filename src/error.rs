use std::path::PathBuf;
use thiserror::Error;

use crate::validate::ValidationReport;

/// Top-level error for the library entry points in [`crate::engine`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// Blocking validation issues; nothing was mutated.
    #[error("validation failed with {} blocking error(s)", .0.errors.len())]
    Validation(ValidationReport),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scanning cannot produce an inventory.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("root directory does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot read root directory {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// The rule table or size tiers are malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("empty category or subcategory name in classification rules")]
    EmptyName,

    #[error("'{0}' is not a valid directory name for a category or subcategory")]
    InvalidName(String),

    #[error("invalid extension '{extension}' in rule {category}/{subcategory}")]
    InvalidExtension {
        category: String,
        subcategory: String,
        extension: String,
    },

    #[error("size tiers must be non-empty with strictly ascending thresholds: {0}")]
    InvalidSizeTiers(String),
}

/// A single move failed; recorded against its operation, the run continues.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("cannot {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("copy of {} failed verification: {detail}", .path.display())]
    VerificationFailed { path: PathBuf, detail: String },
}

impl OperationError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// A root-level condition was lost; remaining operations are skipped.
#[derive(Debug, Error, Clone)]
pub enum FatalExecutionError {
    #[error("root directory vanished: {}", .0.display())]
    RootVanished(PathBuf),

    #[error("root directory is no longer writable: {}", .0.display())]
    RootReadOnly(PathBuf),

    #[error("operation log is no longer writable: {0}")]
    LogUnwritable(String),
}

/// A single reversal failed; remaining reversals continue.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("nothing to restore, {} is missing", .0.display())]
    Missing(PathBuf),

    #[error("refusing to overwrite {}", .0.display())]
    Occupied(PathBuf),

    #[error("{kind:?} entry for {} has no destination", .path.display())]
    NoDestination {
        kind: crate::journal::EntryKind,
        path: PathBuf,
    },

    #[error(transparent)]
    Move(#[from] OperationError),

    #[error("cannot {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The operation log cannot be read or written.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("cannot access operation log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid operation log line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
}
