use std::io::{self, Write};

use anyhow::Result;

use crate::cli::CliArgs;
use crate::commands::common;
use crate::config::OutputFormat;
use crate::diff::Selection;
use crate::output::{TableOptions, json, table};

pub fn run(args: &CliArgs) -> Result<()> {
    let resolved = common::load_config(args)?;
    let job = common::load_job(&resolved)?;
    let format = common::output_format(args, &resolved);

    if args.quiet {
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let payload = json::config_to_json(&resolved, &job);
            let body = json::emit_json_value(&payload, common::json_pretty(&resolved))?;
            println!("{}", body);
        }
        _ => {
            let snapshot = |marker: Option<crate::db::SnapshotMarker>| {
                marker
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "(latest)".to_string())
            };
            let selection = match &job.selection {
                Selection::Patterns(patterns) => ("databases", patterns.join(",")),
                Selection::Tables(tables) => (
                    "tables",
                    tables
                        .iter()
                        .flat_map(|(db, names)| names.iter().map(move |t| format!("{}.{}", db, t)))
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            };
            let rows = vec![
                (
                    "configPath".to_string(),
                    resolved
                        .config_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(none)".to_string()),
                ),
                ("source".to_string(), job.source.instance.redacted()),
                ("sourceSnapshot".to_string(), snapshot(job.source.snapshot)),
                ("destination".to_string(), job.destination.instance.redacted()),
                (
                    "destinationSnapshot".to_string(),
                    snapshot(job.destination.snapshot),
                ),
                (selection.0.to_string(), selection.1),
                (
                    "ignoreTables".to_string(),
                    job.ignore.entries().collect::<Vec<_>>().join(","),
                ),
                ("threshold".to_string(), job.threshold.to_string()),
                ("compare".to_string(), job.compare.names().join(",")),
                ("countMethod".to_string(), job.count_method.as_str().to_string()),
                (
                    "concurrency".to_string(),
                    format!(
                        "databases={} tables={}",
                        job.concurrency.databases, job.concurrency.tables
                    ),
                ),
                (
                    "pool".to_string(),
                    format!(
                        "maxOpen={} maxIdle={} acquireTimeout={}s closeTimeout={}s",
                        job.pool.max_open,
                        job.pool.max_idle,
                        job.pool.acquire_timeout.as_secs(),
                        job.close_timeout.as_secs()
                    ),
                ),
                (
                    "queryTimeoutSeconds".to_string(),
                    job.query_timeout.as_secs().to_string(),
                ),
                (
                    "retries".to_string(),
                    format!(
                        "max={} backoff={}ms",
                        job.retry.max_retries(),
                        job.retry.backoff().as_millis()
                    ),
                ),
            ];

            let rendered =
                table::render_key_value_table("Config", &rows, format, &TableOptions::default());
            writeln!(io::stdout(), "{}", rendered)?;
        }
    }

    Ok(())
}
