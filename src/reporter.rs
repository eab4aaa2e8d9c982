use bytesize::ByteSize;
use std::fmt::Write as _;

use crate::events::{Event, OperationProgress, ProgressObserver};
use crate::model::{OpState, OrganizationPlan, OrganizationResult};
use crate::undo::UndoResult;
use crate::validate::ValidationReport;

/// Reporter aggregates events and produces human or JSON output.
///
/// In JSON mode every event is printed to stdout as one line as soon as it is
/// recorded. In human mode only per-operation failures are printed as they
/// happen; the rest is rendered by the summary functions below.
pub struct Reporter {
    events: Vec<Event>,
    json_mode: bool,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            events: Vec::new(),
            json_mode,
        }
    }

    pub fn json_mode(&self) -> bool {
        self.json_mode
    }

    pub fn record(&mut self, event: Event) {
        if self.json_mode {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else if let Event::OpCompleted {
            seq,
            kind,
            source,
            state: OpState::Failed,
            error,
            ..
        } = &event
        {
            println!(
                "  failed #{} {} {}: {}",
                seq,
                kind,
                source.display(),
                error.as_deref().unwrap_or("unknown error")
            );
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Print a rendered block in human mode only.
    pub fn print(&self, text: &str) {
        if !self.json_mode {
            print!("{}", text);
        }
    }
}

impl ProgressObserver for Reporter {
    fn operation_completed(&mut self, progress: &OperationProgress<'_>) {
        self.record(progress.to_event());
    }
}

/// Human-readable plan preview, one line per operation.
pub fn render_plan(plan: &OrganizationPlan) -> String {
    let mut out = String::new();
    let s = &plan.summary;
    let _ = writeln!(out, "Plan for {}", plan.root.display());
    let _ = writeln!(
        out,
        "  {} file(s) scanned, {} duplicate set(s), {} recoverable",
        s.files_scanned,
        s.duplicate_sets,
        ByteSize::b(s.bytes_recoverable)
    );
    let _ = writeln!(
        out,
        "  {} classify, {} isolate, {} relocate, {} skipped",
        s.classify_operations, s.isolate_operations, s.relocate_operations, s.skipped
    );
    for op in &plan.operations {
        let _ = writeln!(
            out,
            "  {:>4} {:<21} {} -> {}",
            op.seq,
            op.kind.to_string(),
            relative(plan, &op.source),
            relative(plan, &op.destination)
        );
    }
    for warning in &plan.warnings {
        let _ = writeln!(out, "  warning: {}", warning);
    }
    if plan.is_empty() {
        let _ = writeln!(out, "  nothing to do");
    }
    out
}

pub fn render_validation(report: &ValidationReport) -> String {
    let mut out = String::new();
    for issue in &report.errors {
        let _ = writeln!(out, "error: {}", issue);
    }
    for issue in &report.warnings {
        let _ = writeln!(out, "warning: {}", issue);
    }
    if report.is_clean() {
        let _ = writeln!(out, "no issues found");
    }
    out
}

pub fn render_result(plan: &OrganizationPlan, result: &OrganizationResult) -> String {
    let summary = result.summary(plan);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{} of {} operation(s) succeeded, {} failed, {} skipped",
        if summary.dry_run { "[dry run] " } else { "" },
        summary.succeeded,
        summary.planned,
        summary.failed,
        summary.skipped
    );
    let _ = writeln!(
        out,
        "  moved {} in {}",
        ByteSize::b(summary.bytes_moved),
        humantime::format_duration(std::time::Duration::from_millis(summary.elapsed.as_millis() as u64))
    );
    if summary.duplicate_sets > 0 {
        let _ = writeln!(
            out,
            "  {} duplicate set(s), {} recoverable",
            summary.duplicate_sets,
            ByteSize::b(summary.bytes_recoverable)
        );
    }
    if let Some(fatal) = &result.fatal {
        let _ = writeln!(out, "  stopped early: {}", fatal);
    }
    if let Some(log) = &result.log_path {
        let _ = writeln!(out, "  undo with: dirsort undo --log {}", log.display());
    }
    out
}

pub fn render_undo(result: &UndoResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} reversed, {} failed, {} not replayed",
        result.reversed, result.failed, result.not_replayed
    );
    for failure in &result.failures {
        let _ = writeln!(out, "  {}: {}", failure.source.display(), failure.message);
    }
    out
}

fn relative(plan: &OrganizationPlan, path: &std::path::Path) -> String {
    path.strip_prefix(&plan.root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Progress bar for interactive runs.
#[cfg(feature = "cli")]
pub struct ProgressBarObserver {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl ProgressBarObserver {
    const TEMPLATE: &'static str = "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}";

    pub fn new(total: usize) -> Self {
        let bar = indicatif::ProgressBar::new(total as u64);
        let style = indicatif::ProgressStyle::with_template(Self::TEMPLATE)
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(feature = "cli")]
impl ProgressObserver for ProgressBarObserver {
    fn operation_completed(&mut self, progress: &OperationProgress<'_>) {
        self.bar.set_position(progress.completed as u64);
        if let Some(name) = progress.operation.source.file_name() {
            self.bar.set_message(name.to_string_lossy().into_owned());
        }
        if let Some(error) = progress.error
            && progress.operation.state == OpState::Failed
        {
            self.bar.println(format!("failed: {}: {}", progress.operation.source.display(), error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MoveOperation, OpKind, PlanSummary};
    use std::path::PathBuf;

    fn plan() -> OrganizationPlan {
        OrganizationPlan {
            root: PathBuf::from("/r"),
            operations: vec![MoveOperation {
                seq: 0,
                kind: OpKind::Classify,
                source: PathBuf::from("/r/a.txt"),
                destination: PathBuf::from("/r/all_Docs/Text/a.txt"),
                size: 1,
                hash: None,
                state: OpState::Pending,
                final_destination: None,
            }],
            summary: PlanSummary {
                files_scanned: 1,
                classify_operations: 1,
                ..Default::default()
            },
            skipped: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn plan_preview_uses_relative_paths() {
        let text = render_plan(&plan());
        assert!(text.contains("classify"));
        assert!(text.contains("a.txt -> all_Docs/Text/a.txt"));
        assert!(!text.contains("nothing to do"));
    }

    #[test]
    fn reporter_collects_progress_events() {
        let p = plan();
        let mut reporter = Reporter::new(false);
        reporter.operation_completed(&OperationProgress {
            completed: 1,
            total: 1,
            operation: &p.operations[0],
            destination: &p.operations[0].destination,
            error: None,
        });
        assert_eq!(reporter.events().len(), 1);
        let json = serde_json::to_value(&reporter.events()[0]).unwrap();
        assert_eq!(json["type"], "op_completed");
        assert_eq!(json["kind"], "classify");
    }
}
