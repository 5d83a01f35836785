mod common;
mod completions;
mod config;
mod diff;
mod help;
mod init;

use anyhow::Result;

use crate::cli::{CliArgs, CommandKind};

/// Exit code when the comparison ran but found differences or failures.
pub const EXIT_DRIFT: i32 = 3;

/// Run the selected command and return the process exit code.
pub fn dispatch(args: &CliArgs) -> Result<i32> {
    match &args.command {
        CommandKind::Help { all, command } => help::run(*all, command.as_deref()).map(|_| 0),
        CommandKind::Diff(_) => diff::run(args),
        CommandKind::Config(_) => config::run(args).map(|_| 0),
        CommandKind::Init(cmd) => init::run(args, cmd).map(|_| 0),
        CommandKind::Completions(cmd) => completions::run(args, cmd).map(|_| 0),
    }
}
