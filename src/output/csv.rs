use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::db::types::ResultSet;
use crate::diff::report::Report;
use crate::output::report::table_results;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvTarget {
    Stdout,
    File(PathBuf),
}

/// `-` is stdout; a directory (existing, or written with a trailing
/// separator) gets a timestamped file name.
pub fn resolve_target(raw: &str, now: DateTime<Local>) -> CsvTarget {
    let raw = raw.trim();
    if raw == "-" {
        return CsvTarget::Stdout;
    }
    let path = Path::new(raw);
    if raw.is_empty() || raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) || path.is_dir() {
        return CsvTarget::File(path.join(default_file_name(now)));
    }
    CsvTarget::File(path.to_path_buf())
}

pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("clusterdiff-{}.csv", now.format("%Y%m%d-%H%M%S"))
}

pub fn write_report(target: &CsvTarget, report: &Report) -> Result<()> {
    let result_set = table_results(report);
    match target {
        CsvTarget::Stdout => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            write_result_set(&mut handle, &result_set)?;
            handle.flush()?;
        }
        CsvTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
            write_result_set(file, &result_set)?;
        }
    }
    Ok(())
}

fn write_result_set<W: Write>(out: W, result_set: &ResultSet) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let headers = result_set
        .columns
        .iter()
        .map(|col| col.name.as_str())
        .collect::<Vec<_>>();
    writer.write_record(headers)?;
    for row in &result_set.rows {
        let record = row.iter().map(|value| value.as_csv()).collect::<Vec<_>>();
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::report::{DatabaseReport, DatabaseState, TableCountResult};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("valid time")
    }

    #[test]
    fn resolves_targets() {
        assert_eq!(resolve_target("-", fixed_time()), CsvTarget::Stdout);
        assert_eq!(
            resolve_target("out/", fixed_time()),
            CsvTarget::File(PathBuf::from("out/clusterdiff-20240309-070501.csv"))
        );
        assert_eq!(
            resolve_target("diff.csv", fixed_time()),
            CsvTarget::File(PathBuf::from("diff.csv"))
        );
    }

    #[test]
    fn writes_header_sentinels_and_statuses() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested/report.csv");
        let mut report = Report::default();
        report.add_database(DatabaseReport::new("db1", DatabaseState::Compared).with_results([
            TableCountResult::compared("db1", "t1", 100, 103, 2),
            TableCountResult::failed("db1", "t2", Some(7), None, "timed out"),
        ]));

        write_report(&CsvTarget::File(path.clone()), &report).expect("write");
        let body = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "database,table,source_count,destination_count,abs_diff,status",
                "db1,t1,100,103,3,mismatch",
                "db1,t2,7,-1,,failed",
            ]
        );
    }
}
