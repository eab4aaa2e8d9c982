//! Apply a validated plan, one operation at a time.
//!
//! Every mutation, including directory creation, displacement of an
//! overwritten destination and cleanup removals, is appended to the
//! operation log as it happens. A dry run follows the same path but records
//! its changes in an [`Overlay`] instead of touching the disk.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, FatalExecutionError, OperationError};
use crate::events::{OperationProgress, ProgressObserver};
use crate::fsops::{self, Verify};
use crate::journal::{EntryKind, EntryState, JournalWriter, LogEntry, log_file_name};
use crate::model::{MoveOperation, OpState, OperationFailure, OrganizationPlan, OrganizationResult};
use crate::overlay::Overlay;
use crate::policy::{Resolution, resolve_conflict};

/// How one operation ended.
enum Outcome {
    Moved(PathBuf),
    Skipped(String),
    Failed(OperationError),
}

/// Mutable state of one run.
struct Run {
    id: Uuid,
    root: PathBuf,
    overlay: Overlay,
    writer: Option<JournalWriter>,
    log: Vec<LogEntry>,
    fatal: Option<FatalExecutionError>,
    directories_created: Vec<PathBuf>,
    directories_removed: Vec<PathBuf>,
}

impl Run {
    /// Keep the entry in memory and append it to the log file.
    fn record(&mut self, entry: LogEntry) {
        if let Some(writer) = &mut self.writer
            && let Err(e) = writer.write(&entry)
        {
            error!("cannot append to operation log: {}", e);
            self.writer = None;
            if self.fatal.is_none() {
                self.fatal = Some(FatalExecutionError::LogUnwritable(e.to_string()));
            }
        }
        self.log.push(entry);
    }
}

/// Applies plans under one configuration.
pub struct Executor<'a> {
    config: &'a Config,
    dry_run: bool,
    force_copy: bool,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a Config, dry_run: bool) -> Self {
        Self {
            config,
            dry_run,
            force_copy: false,
        }
    }

    /// Always copy-then-delete instead of renaming.
    pub fn force_copy(mut self, force: bool) -> Self {
        self.force_copy = force;
        self
    }

    /// Run every operation of `plan` in order, updating their states.
    ///
    /// Fails only when the operation log cannot be created, before anything
    /// is touched. Everything after that is reported in the result.
    pub fn execute(
        &self,
        plan: &mut OrganizationPlan,
        observer: &mut dyn ProgressObserver,
    ) -> Result<OrganizationResult, Error> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = Uuid::new_v4();
        let root = plan.root.clone();

        let writer = if self.dry_run {
            None
        } else {
            Some(self.open_log(&root, started_at, run_id)?)
        };
        let log_path = writer.as_ref().map(|w| w.path().to_path_buf());
        info!(
            "{} {} operation(s) in {}",
            if self.dry_run { "simulating" } else { "applying" },
            plan.operations.len(),
            root.display()
        );

        let mut run = Run {
            id: run_id,
            root: root.clone(),
            overlay: Overlay::new(),
            writer,
            log: Vec::new(),
            fatal: None,
            directories_created: Vec::new(),
            directories_removed: Vec::new(),
        };
        let mut result = OrganizationResult {
            run_id,
            root: root.clone(),
            dry_run: self.dry_run,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            bytes_moved: 0,
            started_at,
            finished_at: started_at,
            duration: Default::default(),
            errors: Vec::new(),
            fatal: None,
            directories_created: Vec::new(),
            directories_removed: Vec::new(),
            log: Vec::new(),
            log_path,
        };

        let total = plan.operations.len();
        for (index, op) in plan.operations.iter_mut().enumerate() {
            if run.fatal.is_none() {
                run.fatal = self.fatal_condition(&root);
                if let Some(fatal) = &run.fatal {
                    error!("stopping: {}", fatal);
                }
            }

            let (outcome, counted) = match &run.fatal {
                Some(fatal) => (Outcome::Skipped(format!("not attempted: {}", fatal)), false),
                None => (self.apply(op, &mut run), true),
            };
            if counted {
                result.attempted += 1;
            }

            let (state, destination, message) = match outcome {
                Outcome::Moved(destination) => {
                    result.succeeded += 1;
                    result.bytes_moved += op.size;
                    (OpState::Succeeded, destination, None)
                }
                Outcome::Skipped(reason) => {
                    debug!("skipped operation {}: {}", op.seq, reason);
                    result.skipped += 1;
                    (OpState::Skipped, op.destination.clone(), Some(reason))
                }
                Outcome::Failed(e) => {
                    warn!("operation {} failed: {}", op.seq, e);
                    result.failed += 1;
                    result.errors.push(OperationFailure {
                        seq: op.seq,
                        source: op.source.clone(),
                        message: e.to_string(),
                    });
                    (OpState::Failed, op.destination.clone(), Some(e.to_string()))
                }
            };

            op.state = state;
            if destination != op.destination {
                op.final_destination = Some(destination.clone());
            }
            let mut entry = LogEntry::new(
                Some(op.seq),
                op.kind.into(),
                &op.source,
                Some(&destination),
                match state {
                    OpState::Succeeded => EntryState::Succeeded,
                    OpState::Skipped | OpState::Pending => EntryState::Skipped,
                    OpState::Failed => EntryState::Failed,
                },
            );
            if let Some(message) = &message {
                entry = entry.with_error(message);
            }
            run.record(entry);

            observer.operation_completed(&OperationProgress {
                completed: index + 1,
                total,
                operation: op,
                destination: &destination,
                error: message.as_deref(),
            });
        }

        if run.fatal.is_none() {
            self.cleanup(&mut run);
        }

        result.fatal = run.fatal.as_ref().map(ToString::to_string);
        result.directories_created = run.directories_created;
        result.directories_removed = run.directories_removed;
        result.log = run.log;
        result.finished_at = Utc::now();
        result.duration = clock.elapsed();
        info!(
            "run {}: {} succeeded, {} failed, {} skipped in {}",
            run_id,
            result.succeeded,
            result.failed,
            result.skipped,
            humantime::format_duration(result.duration)
        );
        Ok(result)
    }

    fn open_log(&self, root: &Path, started: chrono::DateTime<Utc>, run_id: Uuid) -> Result<JournalWriter, Error> {
        let dir = root.join(&self.config.log_directory);
        std::fs::create_dir_all(&dir).map_err(|source| crate::error::JournalError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(JournalWriter::open(&dir.join(log_file_name(started, run_id)))?)
    }

    fn fatal_condition(&self, root: &Path) -> Option<FatalExecutionError> {
        if !root.is_dir() {
            return Some(FatalExecutionError::RootVanished(root.to_path_buf()));
        }
        if !fsops::can_write(root) {
            return Some(FatalExecutionError::RootReadOnly(root.to_path_buf()));
        }
        None
    }

    fn apply(&self, op: &MoveOperation, run: &mut Run) -> Outcome {
        if !run.overlay.exists(&op.source) {
            return Outcome::Failed(OperationError::SourceMissing(op.source.clone()));
        }

        let mut destination = op.destination.clone();
        match resolve_conflict(
            self.config.conflict_resolution,
            &destination,
            op.is_directory(),
            |p| run.overlay.exists(p),
        ) {
            Resolution::Clear => {}
            Resolution::Renamed(renamed) => {
                info!(
                    "{} exists, using {}",
                    destination.display(),
                    renamed.display()
                );
                destination = renamed;
            }
            Resolution::Skip => {
                return Outcome::Skipped(format!("destination {} exists", destination.display()));
            }
            Resolution::Replace => {
                if let Err(e) = self.displace(&destination, op.seq, run) {
                    return Outcome::Failed(e);
                }
            }
        }

        if let Some(parent) = destination.parent()
            && let Err(e) = self.ensure_dir(parent, Some(op.seq), run)
        {
            return Outcome::Failed(e);
        }

        if self.dry_run {
            run.overlay.record_move(&op.source, &destination);
        } else {
            let verify = self.config.verify_integrity.then_some(Verify {
                algorithm: self.config.hash_algorithm,
                block_size: self.config.hash_block_size,
            });
            match fsops::move_path(&op.source, &destination, self.force_copy, verify) {
                Ok(outcome) if outcome.copied => {
                    debug!("copied {} bytes across filesystems", outcome.bytes_copied);
                }
                Ok(_) => {}
                Err(e) => return Outcome::Failed(e),
            }
        }
        debug!("moved {} -> {}", op.source.display(), destination.display());
        Outcome::Moved(destination)
    }

    /// Create `dir` and any missing ancestors, one logged level at a time.
    fn ensure_dir(&self, dir: &Path, seq: Option<usize>, run: &mut Run) -> Result<(), OperationError> {
        let missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|a| !run.overlay.exists(a))
            .map(Path::to_path_buf)
            .collect();
        for level in missing.into_iter().rev() {
            let created = if self.dry_run {
                run.overlay.record_create_dir(&level);
                Ok(())
            } else {
                fsops::create_dir(&level)
            };
            match created {
                Ok(()) => {
                    run.record(LogEntry::new(seq, EntryKind::CreateDirectory, &level, None, EntryState::Succeeded));
                    run.directories_created.push(level);
                }
                Err(e) => {
                    run.record(
                        LogEntry::new(seq, EntryKind::CreateDirectory, &level, None, EntryState::Failed)
                            .with_error(&e),
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Move an occupied destination aside so an overwrite stays reversible.
    fn displace(&self, occupied: &Path, seq: usize, run: &mut Run) -> Result<(), OperationError> {
        let relative = occupied.strip_prefix(&run.root).unwrap_or(occupied);
        let aside = run
            .root
            .join(&self.config.log_directory)
            .join("displaced")
            .join(run.id.simple().to_string())
            .join(relative);

        let moved = match aside.parent() {
            Some(parent) if self.dry_run => {
                run.overlay.record_create_dir(parent);
                run.overlay.record_move(occupied, &aside);
                Ok(())
            }
            Some(parent) => std::fs::create_dir_all(parent)
                .map_err(|e| OperationError::io("create directory", parent, e))
                .and_then(|()| fsops::move_path(occupied, &aside, false, None).map(|_| ())),
            None => Ok(()),
        };

        let entry = LogEntry::new(Some(seq), EntryKind::Displace, occupied, Some(&aside), EntryState::Succeeded);
        match moved {
            Ok(()) => {
                info!("moved existing {} aside to {}", occupied.display(), aside.display());
                run.record(entry);
                Ok(())
            }
            Err(e) => {
                let entry = LogEntry {
                    state: EntryState::Failed,
                    ..entry
                };
                run.record(entry.with_error(&e));
                Err(e)
            }
        }
    }

    /// Remove empty directories inside every top-level managed directory,
    /// deepest first.
    fn cleanup(&self, run: &mut Run) {
        let managed: Vec<PathBuf> = run
            .overlay
            .list(&run.root)
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| self.config.is_managed_name(n))
            })
            .filter(|p| run.overlay.is_dir(p))
            .collect();
        for dir in managed {
            self.prune(&dir, run);
        }
    }

    /// Returns whether `dir` was removed.
    fn prune(&self, dir: &Path, run: &mut Run) -> bool {
        let mut keep = false;
        for child in run.overlay.list(dir) {
            let hidden = child
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden || !run.overlay.is_dir(&child) || !self.prune(&child, run) {
                keep = true;
            }
        }
        if keep {
            return false;
        }

        let removed = if self.dry_run {
            run.overlay.record_remove(dir);
            Ok(())
        } else {
            fsops::remove_dir(dir)
        };
        match removed {
            Ok(()) => {
                debug!("removed empty directory {}", dir.display());
                run.record(LogEntry::new(None, EntryKind::RemoveDirectory, dir, None, EntryState::Succeeded));
                run.directories_removed.push(dir.to_path_buf());
                true
            }
            Err(e) => {
                warn!("{}", e);
                run.record(
                    LogEntry::new(None, EntryKind::RemoveDirectory, dir, None, EntryState::Failed).with_error(&e),
                );
                false
            }
        }
    }
}
