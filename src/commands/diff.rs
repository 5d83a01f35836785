use std::io::{self, Write};

use anyhow::Result;
use chrono::Local;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::commands::{EXIT_DRIFT, common};
use crate::config::OutputFormat;
use crate::db::InstanceConnector;
use crate::diff::run_job;
use crate::output::csv::{self, CsvTarget};
use crate::output::{TableOptions, json, report};

pub fn run(args: &CliArgs) -> Result<i32> {
    let resolved = common::load_config(args)?;
    let job = common::load_job(&resolved)?;
    let format = common::output_format(args, &resolved);

    let source = InstanceConnector::from_descriptor(job.source.instance.clone());
    let destination = InstanceConnector::from_descriptor(job.destination.instance.clone());

    let runtime = Runtime::new()?;
    let report = runtime.block_on(run_job(&job, source, destination))?;

    for (database, kind) in json::database_errors(&report) {
        warn!(database, kind = kind.as_str(), "database did not compare cleanly");
    }

    let csv_target = resolved
        .output
        .csv
        .as_deref()
        .map(|raw| csv::resolve_target(raw, Local::now()));
    if let Some(target) = &csv_target {
        csv::write_report(target, &report)?;
        if let CsvTarget::File(path) = target {
            info!(path = %path.display(), "wrote CSV report");
        }
    }

    // CSV on stdout replaces the regular rendering.
    let csv_on_stdout = matches!(csv_target, Some(CsvTarget::Stdout));
    if !args.quiet && !csv_on_stdout {
        let body = match format {
            OutputFormat::Json => {
                json::emit_json_value(&json::report_to_json(&report), common::json_pretty(&resolved))?
            }
            _ => report::render(&report, format, &TableOptions::default()),
        };
        writeln!(io::stdout(), "{}", body)?;
    }

    Ok(if report.is_clean() { 0 } else { EXIT_DRIFT })
}
