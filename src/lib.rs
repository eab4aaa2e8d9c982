//! `dirsort` - reversible directory organizer.
//!
//! A run goes scan → classify → plan → validate → execute, and every
//! mutation is appended to an operation log that [`undo`] can replay in
//! reverse. The phases are usable on their own through [`engine`].

pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod exit_codes;
pub mod fsops;
pub mod hashing;
pub mod journal;
pub mod logging;
pub mod model;
pub mod overlay;
pub mod planner;
pub mod policy;
pub mod reporter;
pub mod resolve;
pub mod scanner;
pub mod undo;
pub mod validate;

pub use config::Config;
pub use engine::{organize, plan, undo, validate};
pub use error::Error;
pub use model::{OrganizationPlan, OrganizationResult};
pub use validate::ValidationReport;
