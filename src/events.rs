use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::model::{MoveOperation, OpKind, OpState};

/// Structured event emitted by the command handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ScanCompleted {
        root: PathBuf,
        files: usize,
        folders: usize,
        skipped: usize,
    },
    PlanBuilt {
        operations: usize,
        duplicate_sets: usize,
        bytes_recoverable: u64,
    },
    Validated {
        errors: usize,
        warnings: usize,
    },
    OpCompleted {
        seq: usize,
        kind: OpKind,
        source: PathBuf,
        destination: PathBuf,
        state: OpState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RunFinished {
        run_id: Uuid,
        dry_run: bool,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        bytes_moved: u64,
        duration_ms: u128,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log: Option<PathBuf>,
    },
    UndoStarted {
        log: PathBuf,
        dry_run: bool,
    },
    UndoCompleted {
        reversed: usize,
        failed: usize,
        not_replayed: usize,
    },
}

/// Progress of one finished plan operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationProgress<'a> {
    /// Operations finished so far, this one included.
    pub completed: usize,
    pub total: usize,
    pub operation: &'a MoveOperation,
    /// Where the source ended up (differs from the planned destination after a rename).
    pub destination: &'a std::path::Path,
    pub error: Option<&'a str>,
}

impl OperationProgress<'_> {
    pub fn to_event(&self) -> Event {
        Event::OpCompleted {
            seq: self.operation.seq,
            kind: self.operation.kind,
            source: self.operation.source.clone(),
            destination: self.destination.to_path_buf(),
            state: self.operation.state,
            error: self.error.map(str::to_string),
        }
    }
}

/// Notified after every plan operation, whatever its outcome.
pub trait ProgressObserver {
    fn operation_completed(&mut self, progress: &OperationProgress<'_>);
}

/// Ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn operation_completed(&mut self, _progress: &OperationProgress<'_>) {}
}
