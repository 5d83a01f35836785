use anyhow::Result;

use crate::cli::CliArgs;
use crate::config::{self, OutputFormat, ResolvedConfig};
use crate::diff::ComparisonJob;
use crate::error::{AppError, ErrorKind, classify_error};
use crate::output;

pub fn load_config(args: &CliArgs) -> Result<ResolvedConfig> {
    config::load_from_system(&args.overrides()).map_err(|err| match classify_error(&err) {
        ErrorKind::Internal => AppError::new(ErrorKind::Config, format!("{:#}", err)).into(),
        _ => err,
    })
}

pub fn load_job(resolved: &ResolvedConfig) -> Result<ComparisonJob> {
    config::build_job(&resolved.job)
}

pub fn output_format(args: &CliArgs, resolved: &ResolvedConfig) -> OutputFormat {
    output::select_format(&args.output, &resolved.output)
}

pub fn json_pretty(resolved: &ResolvedConfig) -> bool {
    resolved.output.json_pretty
}
