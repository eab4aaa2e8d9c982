use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConflictPolicy, Strategy};

/// Reversible directory organizer.
#[derive(Parser)]
#[command(name = "dirsort", version, about, long_about = None)]
pub struct Cli {
    /// Log debug detail to stderr (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan, plan, validate and apply.
    Organize(OrganizeArgs),
    /// Print the plan without executing it.
    Preview(PlanArgs),
    /// Check whether the plan could be applied.
    Validate(PlanArgs),
    /// Reverse a previous run using its operation log.
    Undo(UndoArgs),
    /// Print JSON Schema for the configuration file.
    Schema,
    /// Inspect or create configuration files.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Options shared by every command that builds a plan.
#[derive(Args, Clone)]
pub struct PlanArgs {
    /// Directory to organize.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Configuration file (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the classification strategy.
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Override the conflict policy.
    #[arg(long, value_enum)]
    pub conflict: Option<ConflictPolicy>,

    /// Treat every file as unique.
    #[arg(long)]
    pub no_duplicates: bool,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct OrganizeArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Simulate execution without writing.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct UndoArgs {
    /// Operation log of the run to reverse.
    #[arg(long, required = true)]
    pub log: PathBuf,

    /// Dry-run undo (simulate only).
    #[arg(long)]
    pub dry_run: bool,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a default configuration file.
    Init {
        #[arg(default_value = crate::config::LOCAL_CONFIG_FILE)]
        path: PathBuf,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}
