use std::io;

use anyhow::Result;
use clap_complete::{Shell, generate};

use crate::cli::{CliArgs, CompletionsArgs, build_cli};
use crate::error::AppError;

pub fn run(_args: &CliArgs, cmd: &CompletionsArgs) -> Result<()> {
    let shell_name = cmd
        .shell
        .as_deref()
        .ok_or_else(|| AppError::config("--shell is required"))?;

    let shell = match shell_name {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => return Err(AppError::config(format!("Unsupported shell: {}", shell_name)).into()),
    };

    let mut cmd = build_cli(true);
    generate(shell, &mut cmd, "clusterdiff", &mut io::stdout());
    Ok(())
}
