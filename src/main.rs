//! `dirsort` - reversible directory organizer.
//!
//! See `README.md` for user documentation and `DESIGN.md` for architecture.

use clap::Parser;

use dirsort::cli::{Cli, Command};
use dirsort::engine;
use dirsort::exit_codes::exit;

fn main() {
    let cli = Cli::parse();
    dirsort::logging::init(cli.verbose);
    let outcome = match cli.command {
        Command::Organize(args) => engine::organize_command(args),
        Command::Preview(args) => engine::preview_command(args),
        Command::Validate(args) => engine::validate_command(args),
        Command::Undo(args) => engine::undo_command(args),
        Command::Schema => engine::schema_command(),
        Command::Config(command) => engine::config_command(command),
    };
    let exit_code = match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit::OPERATIONAL_FAILURE
        }
    };
    std::process::exit(exit_code);
}
