//! Database and table discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::db::pool::Pool;
use crate::db::session::{Connector, Session};
use crate::diff::job::IgnoreList;
use crate::error::{AppError, ErrorKind, classify_error};

/// A database and the tables that will be counted in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,
    pub tables: Vec<String>,
}

/// Union of the databases matching each pattern, ordered by name.
///
/// A pattern whose lookup fails is logged and skipped. Finding no database at
/// all is an error; when lookups failed, it carries the last failure's kind.
pub async fn list_databases<C: Connector>(
    pool: &Pool<C>,
    patterns: &[String],
    query_timeout: Duration,
) -> Result<Vec<String>> {
    let mut found = BTreeSet::new();
    let mut last_error: Option<anyhow::Error> = None;
    for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let mut lease = match pool.lease().await {
            Ok(lease) => lease,
            Err(err) => {
                error!(pattern, error = %err, "could not list databases");
                last_error = Some(err);
                continue;
            }
        };
        match timeout(query_timeout, lease.session_mut().list_databases(pattern)).await {
            Ok(Ok(names)) => {
                lease.release();
                debug!(pattern, matched = names.len(), "listed databases");
                found.extend(names);
            }
            Ok(Err(err)) => {
                lease.invalidate();
                error!(pattern, error = %err, "could not list databases");
                last_error = Some(err);
            }
            Err(_) => {
                lease.invalidate();
                error!(pattern, "listing databases timed out");
                last_error = Some(
                    AppError::new(
                        ErrorKind::Timeout,
                        format!(
                            "Listing databases on {} timed out after {}s",
                            pool.label(),
                            query_timeout.as_secs()
                        ),
                    )
                    .into(),
                );
            }
        }
    }

    if found.is_empty() {
        if let Some(err) = last_error {
            let kind = match classify_error(&err) {
                ErrorKind::Internal => ErrorKind::SchemaEnumeration,
                kind => kind,
            };
            return Err(AppError::new(
                kind,
                format!("Could not list databases on {}: {}", pool.label(), err),
            )
            .into());
        }
        return Err(AppError::new(
            ErrorKind::SchemaEnumeration,
            format!(
                "No database on {} matched {}",
                pool.label(),
                patterns.join(", ")
            ),
        )
        .into());
    }
    info!(count = found.len(), "found databases to compare");
    Ok(found.into_iter().collect())
}

/// Base tables of one database, sorted and de-duplicated.
pub async fn list_tables<C: Connector>(
    pool: &Pool<C>,
    database: &str,
    query_timeout: Duration,
) -> Result<Vec<String>> {
    let mut lease = pool.lease().await?;
    match timeout(query_timeout, lease.session_mut().list_tables(database)).await {
        Ok(Ok(mut tables)) => {
            lease.release();
            tables.sort();
            tables.dedup();
            Ok(tables)
        }
        Ok(Err(err)) => {
            lease.invalidate();
            Err(AppError::new(
                ErrorKind::SchemaEnumeration,
                format!("Failed to list tables of {} on {}: {}", database, pool.label(), err),
            )
            .into())
        }
        Err(_) => {
            lease.invalidate();
            Err(AppError::new(
                ErrorKind::Timeout,
                format!(
                    "Listing tables of {} on {} timed out after {}s",
                    database,
                    pool.label(),
                    query_timeout.as_secs()
                ),
            )
            .into())
        }
    }
}

/// Parse `db.table` entries (each may itself be a comma-separated list) into
/// tables grouped by database. Everything after the first `.` is the table,
/// so SQL Server's `db.schema.table` works too.
pub fn resolve_explicit_tables<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in entries
        .iter()
        .flat_map(|entry| entry.as_ref().split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
    {
        let Some((database, table)) = item.split_once('.') else {
            return Err(AppError::config(format!(
                "Invalid table '{}': expected db.table",
                item
            ))
            .into());
        };
        let (database, table) = (database.trim(), table.trim());
        if database.is_empty() || table.is_empty() {
            return Err(AppError::config(format!(
                "Invalid table '{}': database and table names must not be empty",
                item
            ))
            .into());
        }
        out.entry(database.to_string())
            .or_default()
            .push(table.to_string());
    }
    for tables in out.values_mut() {
        tables.sort();
        tables.dedup();
    }
    Ok(out)
}

/// Drop ignored tables and restore lexicographic order.
pub fn filter_tables(database: &str, tables: Vec<String>, ignore: &IgnoreList) -> Vec<String> {
    let mut kept: Vec<String> = tables
        .into_iter()
        .filter(|table| !ignore.is_ignored(database, table))
        .collect();
    kept.sort();
    kept.dedup();
    kept
}
