//! Tabular views of a comparison report.

use crate::config::OutputFormat;
use crate::db::types::{Column, ResultSet, Value};
use crate::diff::report::Report;
use crate::output::table::{TableOptions, render_result_set_table};

pub const TABLE_COLUMNS: [&str; 6] = [
    "database",
    "table",
    "source_count",
    "destination_count",
    "abs_diff",
    "status",
];

const TALLY_COLUMNS: [&str; 6] = ["schema", "kind", "source", "destination", "diff", "pass"];

fn columns(names: &[&str]) -> Vec<Column> {
    names
        .iter()
        .map(|name| Column {
            name: (*name).to_string(),
            data_type: None,
        })
        .collect()
}

/// One row per table, ordered by database then table.
pub fn table_results(report: &Report) -> ResultSet {
    let rows = report
        .table_results()
        .map(|result| {
            vec![
                Value::Text(result.database.clone()),
                Value::Text(result.table.clone()),
                Value::Int(result.source_count),
                Value::Int(result.destination_count),
                result
                    .abs_diff
                    .map(|diff| Value::Int(i64::try_from(diff).unwrap_or(i64::MAX)))
                    .unwrap_or(Value::Null),
                Value::Text(result.status.as_str().to_string()),
            ]
        })
        .collect();
    ResultSet {
        columns: columns(&TABLE_COLUMNS),
        rows,
    }
}

pub fn schema_objects(report: &Report) -> ResultSet {
    let rows = report
        .tallies()
        .map(|tally| {
            vec![
                Value::Text(tally.schema.clone()),
                Value::Text(tally.kind.as_str().to_string()),
                Value::Int(tally.source),
                Value::Int(tally.destination),
                Value::Int(i64::try_from(tally.diff).unwrap_or(i64::MAX)),
                Value::Text(if tally.pass { "pass" } else { "FAIL" }.to_string()),
            ]
        })
        .collect();
    ResultSet {
        columns: columns(&TALLY_COLUMNS),
        rows,
    }
}

/// Row-count table, tally table, then the per-database summary lines.
pub fn render(report: &Report, format: OutputFormat, options: &TableOptions) -> String {
    let mut sections = Vec::new();

    let tables = table_results(report);
    if !tables.rows.is_empty() {
        sections.push(render_result_set_table(&tables, format, options));
    }
    let tallies = schema_objects(report);
    if !tallies.rows.is_empty() {
        sections.push(render_result_set_table(&tallies, format, options));
    }
    for error in &report.tally_errors {
        sections.push(format!("schema object tally failed: {}", error));
    }

    let summary = report.summary_lines();
    if !summary.is_empty() {
        sections.push(summary.join("\n"));
    }
    sections.push(
        if report.is_clean() {
            "Result: clean"
        } else {
            "Result: differences found"
        }
        .to_string(),
    );
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::session::ObjectKind;
    use crate::diff::report::{
        DatabaseReport, DatabaseState, SchemaObjectTally, TableCountResult,
    };

    fn sample() -> Report {
        let mut report = Report {
            rows_compared: true,
            ..Report::default()
        };
        report.add_database(
            DatabaseReport::new("db2", DatabaseState::TableSetMismatch)
                .with_results([TableCountResult::missing_in_destination("db2", "t4")]),
        );
        report.add_database(
            DatabaseReport::new("db1", DatabaseState::Compared)
                .with_results([TableCountResult::compared("db1", "t1", 100, 100, 0)]),
        );
        report.add_tally(SchemaObjectTally::new("db1", ObjectKind::Views, 2, 3, 0));
        report
    }

    #[test]
    fn table_rows_are_ordered_and_use_sentinels() {
        let rs = table_results(&sample());
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][0], Value::Text("db1".into()));
        assert_eq!(rs.rows[1][2], Value::Int(-1));
        assert_eq!(rs.rows[1][4], Value::Null);
        assert_eq!(rs.rows[1][5], Value::Text("missing-in-destination".into()));
    }

    #[test]
    fn renders_summary_after_tables() {
        let out = render(&sample(), OutputFormat::Markdown, &TableOptions::default());
        let table_at = out.find("source_count").expect("table header");
        let summary_at = out.find("db1: clean (1 table)").expect("summary");
        assert!(table_at < summary_at);
        assert!(out.contains("FAIL"));
        assert!(out.ends_with("Result: differences found"));
    }
}
