//! Turns layered settings into an immutable [`ComparisonJob`] before any I/O.

use std::time::Duration;

use anyhow::Result;

use super::loader::JobSettings;
use crate::db::instance::{Backend, InstanceDescriptor};
use crate::db::pool::PoolOptions;
use crate::db::session::{CountMethod, SnapshotMarker};
use crate::diff::enumerate::resolve_explicit_tables;
use crate::diff::job::{
    CompareItems, ComparisonJob, Concurrency, DEFAULT_CLOSE_TIMEOUT, DEFAULT_QUERY_TIMEOUT,
    IgnoreList, Selection, SideSpec,
};
use crate::diff::retry::{DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::error::AppError;

pub fn build_job(settings: &JobSettings) -> Result<ComparisonJob> {
    let source = side(
        "source",
        settings.source.as_deref(),
        settings.source_password.as_deref(),
        settings.source_snapshot.as_deref(),
    )?;
    let destination = side(
        "destination",
        settings.destination.as_deref(),
        settings.destination_password.as_deref(),
        settings.destination_snapshot.as_deref(),
    )?;

    let selection = match (
        non_blank(settings.databases.as_deref()),
        non_blank(settings.tables.as_deref()),
    ) {
        (Some(_), Some(_)) => {
            return Err(
                AppError::config("Set either databases or tables, not both").into(),
            );
        }
        (Some(patterns), None) => Selection::Patterns(patterns),
        (None, Some(tables)) => Selection::Tables(resolve_explicit_tables(tables.as_slice())?),
        (None, None) => {
            return Err(AppError::config(
                "Nothing to compare: set databases (LIKE patterns) or tables (db.table)",
            )
            .into());
        }
    };

    let mut job = ComparisonJob::new(source, destination, selection);
    job.ignore = IgnoreList::new(&settings.ignore_tables);
    job.threshold = settings.threshold;
    job.compare = CompareItems::parse(settings.compare.as_slice())?;
    if let Some(raw) = &settings.count_method {
        job.count_method = CountMethod::parse(raw).ok_or_else(|| {
            AppError::config(format!(
                "Unknown count method '{}' (expected exact or statistics)",
                raw
            ))
        })?;
    }
    job.concurrency = Concurrency::new(
        settings.db_concurrency.unwrap_or(0),
        settings.table_concurrency.unwrap_or(0),
    );

    job.query_timeout = match settings.query_timeout_seconds {
        None | Some(0) => DEFAULT_QUERY_TIMEOUT,
        Some(secs) => Duration::from_secs(secs),
    };
    job.retry = RetryPolicy::from_config(
        settings
            .max_retries
            .unwrap_or(i64::from(DEFAULT_MAX_RETRIES)),
        settings
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF),
    );

    let mut pool = PoolOptions::derive(job.concurrency.databases, job.concurrency.tables)
        .with_overrides(settings.max_open_conns, settings.max_idle_conns);
    if let Some(minutes) = settings.conn_max_lifetime_minutes {
        pool.max_lifetime = (minutes > 0).then(|| Duration::from_secs(minutes * 60));
    }
    if let Some(secs) = settings.acquire_timeout_seconds.filter(|secs| *secs > 0) {
        pool.acquire_timeout = Duration::from_secs(secs);
    }
    job.pool = pool;
    job.close_timeout = settings
        .close_timeout_seconds
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CLOSE_TIMEOUT);

    Ok(job)
}

/// Trimmed entries with blanks dropped; `None` when nothing is left.
fn non_blank(entries: Option<&[String]>) -> Option<Vec<String>> {
    let kept = entries?
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    (!kept.is_empty()).then_some(kept)
}

fn side(
    name: &str,
    instance: Option<&str>,
    password: Option<&str>,
    snapshot: Option<&str>,
) -> Result<SideSpec> {
    let raw = instance
        .filter(|raw| !raw.trim().is_empty())
        .ok_or_else(|| AppError::config(format!("Missing {} instance", name)))?;
    let mut descriptor = InstanceDescriptor::parse(raw)?;
    if descriptor.password.is_none() {
        descriptor.password = password.map(str::to_string);
    }

    let mut spec = SideSpec::new(descriptor);
    if let Some(raw) = snapshot.map(str::trim).filter(|raw| !raw.is_empty()) {
        let marker = SnapshotMarker::parse(raw).ok_or_else(|| {
            AppError::config(format!(
                "Invalid {} snapshot marker '{}': expected an unsigned integer",
                name, raw
            ))
        })?;
        if spec.instance.backend == Backend::Mssql {
            return Err(AppError::config(format!(
                "The {} instance is SQL Server, which has no snapshot marker to pin reads to",
                name
            ))
            .into());
        }
        spec = spec.with_snapshot(marker);
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify_error};

    fn settings() -> JobSettings {
        JobSettings {
            source: Some("mysql://root@10.0.0.1:4000".into()),
            destination: Some("mysql://root:pw@10.0.0.2:4000".into()),
            databases: Some(vec!["app_%".into()]),
            ..JobSettings::default()
        }
    }

    fn config_error(settings: &JobSettings) -> bool {
        build_job(settings)
            .map_err(|err| classify_error(&err) == ErrorKind::Config)
            .err()
            .unwrap_or(false)
    }

    #[test]
    fn applies_defaults() {
        let job = build_job(&settings()).expect("job");
        assert_eq!(job.concurrency, Concurrency::default());
        assert_eq!(job.pool.max_open, 400);
        assert_eq!(job.pool.max_idle, 320);
        assert_eq!(job.query_timeout, Duration::from_secs(600));
        assert_eq!(job.retry.max_retries(), 2);
        assert_eq!(job.close_timeout, Duration::from_secs(5));
        assert_eq!(job.count_method, CountMethod::Exact);
        assert_eq!(job.source.snapshot, None);
    }

    #[test]
    fn pool_sizing_follows_concurrency() {
        let mut s = settings();
        s.db_concurrency = Some(1);
        s.table_concurrency = Some(2);
        s.max_retries = Some(9);
        let job = build_job(&s).expect("job");
        assert_eq!(job.pool.max_open, 24);
        assert_eq!(job.pool.max_idle, 19);
        assert_eq!(job.retry.max_retries(), 5);
    }

    #[test]
    fn explicit_tables_and_snapshots() {
        let mut s = settings();
        s.databases = None;
        s.tables = Some(vec!["db1.t1".into(), "db2.t9".into()]);
        s.source_snapshot = Some("449123456789".into());
        s.source_password = Some("from-env".into());
        s.destination_password = Some("ignored".into());
        let job = build_job(&s).expect("job");
        match &job.selection {
            Selection::Tables(tables) => assert_eq!(tables.len(), 2),
            other => panic!("unexpected selection {:?}", other),
        }
        assert_eq!(job.source.snapshot, Some(SnapshotMarker(449123456789)));
        assert_eq!(job.source.instance.password.as_deref(), Some("from-env"));
        assert_eq!(job.destination.instance.password.as_deref(), Some("pw"));
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut missing = settings();
        missing.destination = None;
        assert!(config_error(&missing));

        let mut neither = settings();
        neither.databases = None;
        assert!(config_error(&neither));

        let mut both = settings();
        both.tables = Some(vec!["db1.t1".into()]);
        assert!(config_error(&both));

        let mut bad_table = settings();
        bad_table.databases = None;
        bad_table.tables = Some(vec!["orders".into()]);
        assert!(config_error(&bad_table));

        let mut bad_snapshot = settings();
        bad_snapshot.destination_snapshot = Some("yesterday".into());
        assert!(config_error(&bad_snapshot));

        let mut bad_compare = settings();
        bad_compare.compare = vec!["rows".into(), "columns".into()];
        assert!(config_error(&bad_compare));

        let mut bad_method = settings();
        bad_method.count_method = Some("guess".into());
        assert!(config_error(&bad_method));

        let mut bad_instance = settings();
        bad_instance.source = Some("postgres://u@h".into());
        assert!(config_error(&bad_instance));
    }

    #[test]
    fn blank_selection_lists_count_as_unset() {
        let mut s = settings();
        s.databases = Some(Vec::new());
        s.tables = Some(vec!["db1.t1".into()]);
        let job = build_job(&s).expect("empty databases list is unset");
        assert!(matches!(job.selection, Selection::Tables(_)));

        let mut s = settings();
        s.databases = Some(vec!["  ".into(), " app_% ".into()]);
        let job = build_job(&s).expect("job");
        assert_eq!(job.selection, Selection::Patterns(vec!["app_%".into()]));

        let mut blank = settings();
        blank.databases = Some(vec![" ".into()]);
        assert!(config_error(&blank));
    }

    #[test]
    fn sql_server_sides_cannot_take_snapshots() {
        let mut s = settings();
        s.source = Some("mssql://sa:pw@db:1433".into());
        s.source_snapshot = Some("449123456789".into());
        let err = build_job(&s).unwrap_err();
        assert_eq!(classify_error(&err), ErrorKind::Config);
        assert!(err.to_string().contains("SQL Server"));

        s.source_snapshot = None;
        assert!(build_job(&s).is_ok());
    }
}
