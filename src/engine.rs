//! Library entry points and the command handlers built on them.
//!
//! The phase functions ([`plan`], [`validate`], [`organize`], [`undo`]) use
//! the typed [`Error`]; the `*_command` handlers wrap them for the binary,
//! returning an exit code.

use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::cli::{ConfigCommand, OrganizeArgs, PlanArgs, UndoArgs};
use crate::config::{self, Config};
use crate::error::Error;
use crate::events::{Event, NoProgress, ProgressObserver};
use crate::executor::Executor;
use crate::exit_codes::exit;
use crate::model::{OrganizationPlan, OrganizationResult};
use crate::planner::Planner;
use crate::reporter::{self, Reporter};
use crate::scanner::Scanner;
use crate::undo::{UndoOptions, UndoResult};
use crate::validate::{ValidationReport, Validator};

/// Scan `root` and build its plan. Nothing is mutated.
pub fn plan(root: &Path, config: &Config) -> Result<OrganizationPlan, Error> {
    let classifier = Classifier::from_config(config)?;
    let scan = Scanner::new(config, &classifier)?.scan(root)?;
    info!(
        "scanned {}: {} file(s), {} folder(s), {} skipped",
        scan.root.display(),
        scan.records.len(),
        scan.directories.len(),
        scan.skipped.len()
    );
    let plan = Planner::new(config).plan(&scan);
    info!("planned {} operation(s)", plan.operations.len());
    Ok(plan)
}

/// Plan `root` and run every pre-flight check against the plan.
pub fn validate(root: &Path, config: &Config) -> Result<ValidationReport, Error> {
    let plan = plan(root, config)?;
    Ok(Validator::new(config).validate(&plan))
}

/// Run an already validated plan.
pub fn execute(
    plan: &mut OrganizationPlan,
    config: &Config,
    dry_run: bool,
    observer: &mut dyn ProgressObserver,
) -> Result<OrganizationResult, Error> {
    Executor::new(config, dry_run).execute(plan, observer)
}

/// Plan, validate and apply. Blocking validation issues abort before any
/// mutation with [`Error::Validation`].
pub fn organize(root: &Path, config: &Config, dry_run: bool) -> Result<OrganizationResult, Error> {
    organize_with(root, config, dry_run, &mut NoProgress).map(|(_, result)| result)
}

/// [`organize`] with a progress observer; also returns the executed plan.
pub fn organize_with(
    root: &Path,
    config: &Config,
    dry_run: bool,
    observer: &mut dyn ProgressObserver,
) -> Result<(OrganizationPlan, OrganizationResult), Error> {
    let mut plan = plan(root, config)?;
    let report = Validator::new(config).validate(&plan);
    if report.is_blocking() {
        return Err(Error::Validation(report));
    }
    for issue in &report.warnings {
        warn!("{}", issue);
    }
    let result = execute(&mut plan, config, dry_run, observer)?;
    Ok((plan, result))
}

/// Reverse a run from its operation log.
pub fn undo(log: &Path, options: UndoOptions) -> Result<UndoResult, Error> {
    crate::undo::undo(log, options)
}

fn load_config(args: &PlanArgs) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(policy) = args.conflict {
        config.conflict_resolution = policy;
    }
    if args.no_duplicates {
        config.detect_duplicates = false;
    }
    Ok(config)
}

/// Plan, emit the planning events and validate.
fn prepare(args: &PlanArgs, config: &Config, reporter: &mut Reporter) -> Result<(OrganizationPlan, ValidationReport)> {
    let plan = plan(&args.dir, config).with_context(|| format!("failed to plan {}", args.dir.display()))?;
    let s = &plan.summary;
    reporter.record(Event::ScanCompleted {
        root: plan.root.clone(),
        files: s.files_scanned,
        folders: s.relocate_operations,
        skipped: plan.skipped.len(),
    });
    reporter.record(Event::PlanBuilt {
        operations: plan.operations.len(),
        duplicate_sets: s.duplicate_sets,
        bytes_recoverable: s.bytes_recoverable,
    });
    let report = Validator::new(config).validate(&plan);
    reporter.record(Event::Validated {
        errors: report.errors.len(),
        warnings: report.warnings.len(),
    });
    Ok((plan, report))
}

pub fn organize_command(args: OrganizeArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.plan.json);
    let config = load_config(&args.plan)?;
    let (mut plan, report) = prepare(&args.plan, &config, &mut reporter)?;
    if report.is_blocking() {
        reporter.print(&reporter::render_validation(&report));
        return Ok(exit::VALIDATION_FAILURE);
    }
    if !report.warnings.is_empty() {
        reporter.print(&reporter::render_validation(&report));
    }

    let result = run_with_progress(&mut plan, &config, args.dry_run, &mut reporter)
        .context("failed to start run")?;
    reporter.record(Event::RunFinished {
        run_id: result.run_id,
        dry_run: result.dry_run,
        succeeded: result.succeeded,
        failed: result.failed,
        skipped: result.skipped,
        bytes_moved: result.bytes_moved,
        duration_ms: result.duration.as_millis(),
        log: result.log_path.clone(),
    });
    reporter.print(&reporter::render_result(&plan, &result));

    Ok(if result.is_complete_success() {
        exit::SUCCESS
    } else {
        exit::PARTIAL_FAILURE
    })
}

#[cfg(feature = "cli")]
fn run_with_progress(
    plan: &mut OrganizationPlan,
    config: &Config,
    dry_run: bool,
    reporter: &mut Reporter,
) -> Result<OrganizationResult, Error> {
    use std::io::IsTerminal;
    if reporter.json_mode() || !std::io::stderr().is_terminal() {
        return execute(plan, config, dry_run, reporter);
    }
    let mut bar = reporter::ProgressBarObserver::new(plan.operations.len());
    let result = execute(plan, config, dry_run, &mut bar);
    bar.finish();
    result
}

#[cfg(not(feature = "cli"))]
fn run_with_progress(
    plan: &mut OrganizationPlan,
    config: &Config,
    dry_run: bool,
    reporter: &mut Reporter,
) -> Result<OrganizationResult, Error> {
    execute(plan, config, dry_run, reporter)
}

pub fn preview_command(args: PlanArgs) -> Result<i32> {
    let reporter = Reporter::new(false);
    let config = load_config(&args)?;
    let plan = plan(&args.dir, &config).with_context(|| format!("failed to plan {}", args.dir.display()))?;
    if args.json {
        println!("{}", plan.to_json().context("failed to encode plan")?);
    } else {
        reporter.print(&reporter::render_plan(&plan));
    }
    Ok(exit::SUCCESS)
}

pub fn validate_command(args: PlanArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    let config = load_config(&args)?;
    let (_, report) = prepare(&args, &config, &mut reporter)?;
    if args.json {
        println!("{}", serde_json::to_string(&report).context("failed to encode report")?);
    } else {
        reporter.print(&reporter::render_validation(&report));
    }
    Ok(if report.is_blocking() {
        exit::VALIDATION_FAILURE
    } else {
        exit::SUCCESS
    })
}

pub fn undo_command(args: UndoArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    reporter.record(Event::UndoStarted {
        log: args.log.clone(),
        dry_run: args.dry_run,
    });
    let result = undo(&args.log, UndoOptions { dry_run: args.dry_run })
        .with_context(|| format!("failed to undo {}", args.log.display()))?;
    reporter.record(Event::UndoCompleted {
        reversed: result.reversed,
        failed: result.failed,
        not_replayed: result.not_replayed,
    });
    reporter.print(&reporter::render_undo(&result));
    Ok(if result.is_complete() {
        exit::SUCCESS
    } else {
        exit::PARTIAL_FAILURE
    })
}

pub fn schema_command() -> Result<i32> {
    println!("{}", config::generate_schema().context("failed to encode schema")?);
    Ok(exit::SUCCESS)
}

pub fn config_command(command: ConfigCommand) -> Result<i32> {
    match command {
        ConfigCommand::Show { config } => {
            let config = Config::load(config.as_deref()).context("failed to load configuration")?;
            print!("{}", config.to_toml().context("failed to encode configuration")?);
        }
        ConfigCommand::Init { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to replace it)", path.display());
            }
            Config::default()
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
    }
    Ok(exit::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn organize_refuses_blocking_plans_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();
        // A plain file where a managed directory has to be created.
        fs::write(root.join("all_Docs"), b"not a directory").unwrap();

        let before: Vec<_> = fs::read_dir(root).unwrap().map(|e| e.unwrap().file_name()).collect();
        match organize(root, &Config::default(), false) {
            Err(Error::Validation(report)) => {
                assert!(report.has_error(crate::validate::Check::ParentNotDirectory))
            }
            other => panic!("expected a validation error, got {:?}", other.map(|r| r.succeeded)),
        }
        let after: Vec<_> = fs::read_dir(root).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(before.len(), after.len());
        assert!(root.join("a.txt").exists());
    }

    #[test]
    fn malformed_rules_fail_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_toml("[classification_rules.\"a/b\"]\nX = [\"x\"]\n").unwrap();
        assert!(matches!(plan(dir.path(), &config), Err(Error::Classification(_))));
    }

    #[test]
    fn missing_root_is_a_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = plan(&dir.path().join("missing"), &Config::default());
        assert!(matches!(result, Err(Error::Scan(_))));
    }
}
