//! Pre-flight checks for a plan.
//!
//! Every check runs regardless of earlier failures so one report lists every
//! blocking problem. Nothing here mutates the filesystem or the plan.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{OpKind, OrganizationPlan};
use crate::resolve::{LinkTarget, is_within, resolve_link};

/// Used-space ratio above which a warning is raised.
const HIGH_USAGE_RATIO: f64 = 0.9;

/// Which check produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    RootAccess,
    DiskSpace,
    Permission,
    DuplicateDestination,
    OrderingHazard,
    Symlink,
    OutsideRoot,
    SourceMissing,
    DestinationInsideSource,
    DestinationExists,
    ParentNotDirectory,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::RootAccess => "root-access",
            Check::DiskSpace => "disk-space",
            Check::Permission => "permission",
            Check::DuplicateDestination => "duplicate-destination",
            Check::OrderingHazard => "ordering-hazard",
            Check::Symlink => "symlink",
            Check::OutsideRoot => "outside-root",
            Check::SourceMissing => "source-missing",
            Check::DestinationInsideSource => "destination-inside-source",
            Check::DestinationExists => "destination-exists",
            Check::ParentNotDirectory => "parent-not-directory",
        };
        f.write_str(name)
    }
}

/// One finding, tagged with the offending operation when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub check: Check,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seq {
            Some(seq) => write!(f, "[{}] operation {}: {}", self.check, seq, self.message),
            None => write!(f, "[{}] {}", self.check, self.message),
        }
    }
}

/// Blocking errors and advisory warnings for one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_blocking(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Whether any blocking error came from `check`.
    pub fn has_error(&self, check: Check) -> bool {
        self.errors.iter().any(|e| e.check == check)
    }

    fn error(&mut self, check: Check, seq: Option<usize>, path: Option<&Path>, message: String) {
        debug!("validation error [{}]: {}", check, message);
        self.errors.push(ValidationIssue {
            check,
            seq,
            path: path.map(Path::to_path_buf),
            message,
        });
    }

    fn warn(&mut self, check: Check, seq: Option<usize>, path: Option<&Path>, message: String) {
        debug!("validation warning [{}]: {}", check, message);
        self.warnings.push(ValidationIssue {
            check,
            seq,
            path: path.map(Path::to_path_buf),
            message,
        });
    }
}

/// Filesystem facts the validator depends on.
pub trait DiskProbe {
    /// Bytes available to this process on the filesystem holding `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
    /// Total size of the filesystem holding `path`.
    fn total_space(&self, path: &Path) -> io::Result<u64>;
    /// Identifier of the device holding `path`.
    fn device_id(&self, path: &Path) -> io::Result<u64>;
    /// Whether entries can be created and removed in `dir`.
    fn can_write(&self, dir: &Path) -> bool;
}

/// [`DiskProbe`] backed by the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl DiskProbe for SystemProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }

    fn total_space(&self, path: &Path) -> io::Result<u64> {
        fs2::total_space(path)
    }

    fn device_id(&self, path: &Path) -> io::Result<u64> {
        crate::fsops::device_id(path)
    }

    fn can_write(&self, dir: &Path) -> bool {
        crate::fsops::can_write(dir)
    }
}

/// Runs every check against a plan.
pub struct Validator<'a, P: DiskProbe = SystemProbe> {
    config: &'a Config,
    probe: P,
}

impl<'a> Validator<'a, SystemProbe> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            probe: SystemProbe,
        }
    }
}

impl<'a, P: DiskProbe> Validator<'a, P> {
    pub fn with_probe(config: &'a Config, probe: P) -> Self {
        Self { config, probe }
    }

    pub fn validate(&self, plan: &OrganizationPlan) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_root(plan, &mut report);
        self.check_sources(plan, &mut report);
        self.check_destinations(plan, &mut report);
        self.check_ordering(plan, &mut report);
        self.check_permissions(plan, &mut report);
        self.check_disk_space(plan, &mut report);

        if report.is_blocking() {
            warn!(
                "validation found {} error(s), {} warning(s)",
                report.errors.len(),
                report.warnings.len()
            );
        } else {
            info!("validation passed with {} warning(s)", report.warnings.len());
        }
        report
    }

    fn check_root(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        let root = &plan.root;
        if !root.is_dir() {
            report.error(
                Check::RootAccess,
                None,
                Some(root),
                format!("root directory {} does not exist", root.display()),
            );
        } else if let Err(e) = std::fs::read_dir(root) {
            report.error(
                Check::RootAccess,
                None,
                Some(root),
                format!("root directory {} is not traversable: {}", root.display(), e),
            );
        }
    }

    /// Source existence and symlink policy.
    fn check_sources(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        for op in &plan.operations {
            let meta = match op.source.symlink_metadata() {
                Ok(meta) => meta,
                Err(_) => {
                    report.error(
                        Check::SourceMissing,
                        Some(op.seq),
                        Some(&op.source),
                        format!("source {} no longer exists", op.source.display()),
                    );
                    continue;
                }
            };
            if !meta.file_type().is_symlink() {
                continue;
            }
            if !self.config.follow_symlinks {
                report.error(
                    Check::Symlink,
                    Some(op.seq),
                    Some(&op.source),
                    format!("{} is a symlink and symlinks are not followed", op.source.display()),
                );
                continue;
            }
            let resolved = resolve_link(&plan.root, &op.source);
            if let Some(message) = resolved.describe(&op.source) {
                report.error(Check::Symlink, Some(op.seq), Some(&op.source), message);
            } else if matches!(resolved, LinkTarget::Inside { is_dir: true, .. })
                && op.kind != OpKind::RelocateSubdirectory
            {
                report.error(
                    Check::Symlink,
                    Some(op.seq),
                    Some(&op.source),
                    format!("{} now points at a directory", op.source.display()),
                );
            }
        }
    }

    fn check_destinations(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        let mut targets: HashMap<&Path, usize> = HashMap::new();
        for op in &plan.operations {
            if let Some(first) = targets.insert(&op.destination, op.seq) {
                report.error(
                    Check::DuplicateDestination,
                    Some(op.seq),
                    Some(&op.destination),
                    format!(
                        "{} is also the destination of operation {}",
                        op.destination.display(),
                        first
                    ),
                );
            }
            if !is_within(&plan.root, &op.destination) {
                report.error(
                    Check::OutsideRoot,
                    Some(op.seq),
                    Some(&op.destination),
                    format!("{} lies outside the root", op.destination.display()),
                );
            }
            if op.destination != op.source && op.destination.starts_with(&op.source) {
                report.error(
                    Check::DestinationInsideSource,
                    Some(op.seq),
                    Some(&op.destination),
                    format!(
                        "cannot move {} into itself ({})",
                        op.source.display(),
                        op.destination.display()
                    ),
                );
            }
            if let Some(blocker) = op.destination.parent().and_then(nearest_existing)
                && !blocker.is_dir()
            {
                report.error(
                    Check::ParentNotDirectory,
                    Some(op.seq),
                    Some(&blocker),
                    format!(
                        "cannot create {} because {} is not a directory",
                        op.destination.display(),
                        blocker.display()
                    ),
                );
            }
            if op.destination.symlink_metadata().is_ok() {
                report.warn(
                    Check::DestinationExists,
                    Some(op.seq),
                    Some(&op.destination),
                    format!(
                        "{} already exists; the {} policy will apply",
                        op.destination.display(),
                        format!("{:?}", self.config.conflict_resolution).to_lowercase()
                    ),
                );
            }
        }
    }

    /// A source must not be produced, or carried away, by an earlier operation.
    fn check_ordering(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        let mut produced: HashMap<&Path, usize> = HashMap::new();
        let mut relocated: HashMap<&Path, usize> = HashMap::new();
        for op in &plan.operations {
            if let Some((ancestor, earlier)) = op
                .source
                .ancestors()
                .find_map(|a| produced.get(a).map(|seq| (a, *seq)))
            {
                report.error(
                    Check::OrderingHazard,
                    Some(op.seq),
                    Some(&op.source),
                    format!(
                        "source {} depends on {}, the destination of operation {}",
                        op.source.display(),
                        ancestor.display(),
                        earlier
                    ),
                );
            }
            if let Some((ancestor, earlier)) = op
                .source
                .ancestors()
                .skip(1)
                .find_map(|a| relocated.get(a).map(|seq| (a, *seq)))
            {
                report.error(
                    Check::OrderingHazard,
                    Some(op.seq),
                    Some(&op.source),
                    format!(
                        "source {} sits inside {}, which operation {} moves away first",
                        op.source.display(),
                        ancestor.display(),
                        earlier
                    ),
                );
            }
            produced.insert(&op.destination, op.seq);
            if op.kind == OpKind::RelocateSubdirectory {
                relocated.insert(&op.source, op.seq);
            }
        }
    }

    /// Root, every source directory and the nearest existing ancestor of every
    /// destination parent must be writable.
    fn check_permissions(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        if plan.root.is_dir() && !self.probe.can_write(&plan.root) {
            report.error(
                Check::Permission,
                None,
                Some(&plan.root),
                format!("no write permission on root {}", plan.root.display()),
            );
        }
        dirs.insert(plan.root.clone());
        for op in &plan.operations {
            let candidates = [
                op.source.parent().map(Path::to_path_buf),
                op.destination.parent().and_then(nearest_existing),
            ];
            for dir in candidates.into_iter().flatten() {
                if !dir.is_dir() || !dirs.insert(dir.clone()) {
                    continue;
                }
                if !self.probe.can_write(&dir) {
                    report.error(
                        Check::Permission,
                        Some(op.seq),
                        Some(&dir),
                        format!("no write permission on {}", dir.display()),
                    );
                }
            }
        }
    }

    /// Only moves that cross devices consume space.
    fn check_disk_space(&self, plan: &OrganizationPlan, report: &mut ValidationReport) {
        if !plan.root.is_dir() {
            return;
        }
        let mut needed: BTreeMap<u64, (PathBuf, u64)> = BTreeMap::new();
        let mut unknown: HashSet<PathBuf> = HashSet::new();
        for op in &plan.operations {
            let Some(target) = op.destination.parent().and_then(nearest_existing) else {
                continue;
            };
            let (src_dev, dst_dev) = match (
                self.probe.device_id(&op.source),
                self.probe.device_id(&target),
            ) {
                (Ok(s), Ok(d)) => (s, d),
                _ => {
                    if unknown.insert(target.clone()) {
                        report.warn(
                            Check::DiskSpace,
                            Some(op.seq),
                            Some(&target),
                            format!("cannot determine the device of {}", target.display()),
                        );
                    }
                    continue;
                }
            };
            if src_dev != dst_dev {
                needed.entry(dst_dev).or_insert_with(|| (target.clone(), 0)).1 += op.size;
            }
        }

        for (path, bytes) in needed.values() {
            match self.probe.available_space(path) {
                Ok(available) if available < *bytes => report.error(
                    Check::DiskSpace,
                    None,
                    Some(path),
                    format!(
                        "{} needed on the filesystem of {}, only {} available",
                        bytesize::ByteSize(*bytes),
                        path.display(),
                        bytesize::ByteSize(available)
                    ),
                ),
                Ok(_) => {}
                Err(e) => report.warn(
                    Check::DiskSpace,
                    None,
                    Some(path),
                    format!("cannot query free space for {}: {}", path.display(), e),
                ),
            }
        }

        match (
            self.probe.total_space(&plan.root),
            self.probe.available_space(&plan.root),
        ) {
            (Ok(total), Ok(available)) if total > 0 => {
                let used = total.saturating_sub(available) as f64 / total as f64;
                if used > HIGH_USAGE_RATIO {
                    report.warn(
                        Check::DiskSpace,
                        None,
                        Some(&plan.root),
                        format!("filesystem of the root is {:.0}% full", used * 100.0),
                    );
                }
            }
            (Ok(_), Ok(_)) => {}
            (Err(e), _) | (_, Err(e)) => report.warn(
                Check::DiskSpace,
                None,
                Some(&plan.root),
                format!("cannot query disk usage for the root: {}", e),
            ),
        }
    }
}

/// `path` or its closest ancestor that exists.
fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|a| a.symlink_metadata().is_ok())
        .map(Path::to_path_buf)
}
