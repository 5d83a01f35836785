use serde::Serialize;
use serde_json::json;

use crate::config::ResolvedConfig;
use crate::diff::job::{ComparisonJob, Selection, SideSpec};
use crate::diff::report::Report;
use crate::error::ErrorKind;

pub fn emit_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

pub fn emit_json_value(value: &serde_json::Value, pretty: bool) -> anyhow::Result<String> {
    emit_json(value, pretty)
}

pub fn error_json(message: &str, kind: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "kind": kind,
        }
    })
}

pub fn report_to_json(report: &Report) -> serde_json::Value {
    let databases = report
        .databases
        .values()
        .map(|database| {
            let mut entry = json!({
                "name": database.name,
                "clean": database.is_clean(),
                "tables": database.tables.len(),
                "summary": database.summary_line(),
                "errorKind": database.state.error_kind(),
            });
            if let Ok(state) = serde_json::to_value(&database.state) {
                if let (Some(entry), Some(state)) = (entry.as_object_mut(), state.as_object()) {
                    entry.extend(state.clone());
                }
            }
            entry
        })
        .collect::<Vec<_>>();

    json!({
        "tables": report.table_results().collect::<Vec<_>>(),
        "databases": databases,
        "schemaObjects": report.tallies().collect::<Vec<_>>(),
        "tallyErrors": report.tally_errors,
        "rowsCompared": report.rows_compared,
        "clean": report.is_clean(),
    })
}

fn side_to_json(side: &SideSpec) -> serde_json::Value {
    json!({
        "instance": side.instance.redacted(),
        "backend": side.instance.backend.as_str(),
        "snapshotTs": side.snapshot,
    })
}

fn selection_to_json(selection: &Selection) -> serde_json::Value {
    match selection {
        Selection::Patterns(patterns) => json!({ "databases": patterns }),
        Selection::Tables(tables) => {
            let flat = tables
                .iter()
                .flat_map(|(db, names)| names.iter().map(move |t| format!("{}.{}", db, t)))
                .collect::<Vec<_>>();
            json!({ "tables": flat })
        }
    }
}

/// The validated job, with passwords redacted.
pub fn job_to_json(job: &ComparisonJob) -> serde_json::Value {
    json!({
        "source": side_to_json(&job.source),
        "destination": side_to_json(&job.destination),
        "selection": selection_to_json(&job.selection),
        "ignoreTables": job.ignore,
        "threshold": job.threshold,
        "compare": job.compare.names(),
        "countMethod": job.count_method.as_str(),
        "concurrency": job.concurrency,
        "queryTimeoutSeconds": job.query_timeout.as_secs(),
        "maxRetries": job.retry.max_retries(),
        "retryBackoffMs": job.retry.backoff().as_millis() as u64,
        "pool": {
            "maxOpenConns": job.pool.max_open,
            "maxIdleConns": job.pool.max_idle,
            "connMaxLifetimeMinutes": job.pool.max_lifetime.map(|d| d.as_secs() / 60),
            "acquireTimeoutSeconds": job.pool.acquire_timeout.as_secs(),
            "closeTimeoutSeconds": job.close_timeout.as_secs(),
        },
    })
}

pub fn config_to_json(resolved: &ResolvedConfig, job: &ComparisonJob) -> serde_json::Value {
    json!({
        "configPath": resolved.config_path.as_ref().map(|p| p.display().to_string()),
        "job": job_to_json(job),
        "output": {
            "defaultFormat": resolved.output.default_format.as_str(),
            "jsonPretty": resolved.output.json_pretty,
            "csv": resolved.output.csv,
        },
    })
}

/// Databases that went wrong at database level, with the error class.
pub fn database_errors(report: &Report) -> Vec<(&str, ErrorKind)> {
    report
        .databases
        .values()
        .filter_map(|db| db.state.error_kind().map(|kind| (db.name.as_str(), kind)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::instance::InstanceDescriptor;
    use crate::db::session::ObjectKind;
    use crate::diff::report::{DatabaseReport, DatabaseState, SchemaObjectTally, TableCountResult};

    #[test]
    fn emits_error_json() {
        let value = error_json("boom", "internal");
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["error"]["kind"], "internal");
    }

    #[test]
    fn report_json_shape() {
        let mut report = Report {
            rows_compared: true,
            ..Report::default()
        };
        report.add_database(
            DatabaseReport::new("db1", DatabaseState::Compared)
                .with_results([TableCountResult::compared("db1", "t1", 5, 5, 0)]),
        );
        report.add_database(DatabaseReport::new(
            "db9",
            DatabaseState::Failed {
                kind: ErrorKind::SchemaEnumeration,
                reason: "listing failed".into(),
            },
        ));
        report.add_tally(SchemaObjectTally::new("db1", ObjectKind::Tables, 1, 1, 0));

        let value = report_to_json(&report);
        assert_eq!(value["clean"], false);
        assert_eq!(value["tables"][0]["sourceCount"], 5);
        assert_eq!(value["tables"][0]["status"], "match");
        assert_eq!(value["databases"][1]["state"], "failed");
        assert_eq!(value["databases"][1]["reason"], "listing failed");
        assert_eq!(value["schemaObjects"][0]["kind"], "tables");
        assert_eq!(value["databases"][1]["errorKind"], "SchemaEnumeration");
        assert!(value["databases"][1].get("kind").is_none());
        assert!(value["databases"][0]["errorKind"].is_null());
        assert_eq!(
            database_errors(&report),
            vec![("db9", ErrorKind::SchemaEnumeration)]
        );
    }

    #[test]
    fn job_json_redacts_passwords() {
        let job = ComparisonJob::new(
            SideSpec::new(InstanceDescriptor::parse("mysql://root:hunter2@a:4000").expect("src")),
            SideSpec::new(InstanceDescriptor::parse("mysql://root@b:4000").expect("dst")),
            Selection::Patterns(vec!["app_%".into()]),
        );
        let value = job_to_json(&job);
        let text = value.to_string();
        assert!(!text.contains("hunter2"));
        assert_eq!(value["source"]["instance"], "mysql://root:***@a:4000");
        assert_eq!(value["selection"]["databases"][0], "app_%");
        assert_eq!(value["pool"]["maxOpenConns"], 400);
    }
}
