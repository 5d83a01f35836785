//! Result types and the order-independent aggregator that folds them into a report.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::db::session::ObjectKind;
use crate::error::ErrorKind;

/// Count sentinel for a table that is absent on a side or could not be counted.
pub const ABSENT: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStatus {
    Match,
    Mismatch,
    MissingInDestination,
    MissingInSource,
    Failed,
}

impl TableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TableStatus::Match => "match",
            TableStatus::Mismatch => "mismatch",
            TableStatus::MissingInDestination => "missing-in-destination",
            TableStatus::MissingInSource => "missing-in-source",
            TableStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCountResult {
    pub database: String,
    pub table: String,
    pub source_count: i64,
    pub destination_count: i64,
    pub abs_diff: Option<u64>,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableCountResult {
    pub fn compared(database: &str, table: &str, source: i64, destination: i64, threshold: u64) -> Self {
        let diff = destination.abs_diff(source);
        Self {
            database: database.to_string(),
            table: table.to_string(),
            source_count: source,
            destination_count: destination,
            abs_diff: Some(diff),
            status: if diff <= threshold {
                TableStatus::Match
            } else {
                TableStatus::Mismatch
            },
            error: None,
        }
    }

    pub fn missing_in_destination(database: &str, table: &str) -> Self {
        Self::absent(database, table, TableStatus::MissingInDestination)
    }

    pub fn missing_in_source(database: &str, table: &str) -> Self {
        Self::absent(database, table, TableStatus::MissingInSource)
    }

    fn absent(database: &str, table: &str, status: TableStatus) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            source_count: ABSENT,
            destination_count: ABSENT,
            abs_diff: None,
            status,
            error: None,
        }
    }

    /// A table whose counts could not be determined; known counts are kept.
    pub fn failed(
        database: &str,
        table: &str,
        source: Option<i64>,
        destination: Option<i64>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            source_count: source.unwrap_or(ABSENT),
            destination_count: destination.unwrap_or(ABSENT),
            abs_diff: None,
            status: TableStatus::Failed,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum DatabaseState {
    Compared,
    /// Neither side has any table left after filtering.
    NothingToCompare,
    /// Table sets differ; no counts were taken.
    TableSetMismatch,
    Failed {
        #[serde(skip_serializing)]
        kind: ErrorKind,
        reason: String,
    },
}

impl DatabaseState {
    /// The error class behind a database that did not compare cleanly at
    /// database level.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            DatabaseState::Compared | DatabaseState::NothingToCompare => None,
            DatabaseState::TableSetMismatch => Some(ErrorKind::TableSetMismatch),
            DatabaseState::Failed { kind, .. } => Some(*kind),
        }
    }

    fn severity(&self) -> u8 {
        match self {
            DatabaseState::NothingToCompare => 0,
            DatabaseState::Compared => 1,
            DatabaseState::TableSetMismatch => 2,
            DatabaseState::Failed { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReport {
    pub name: String,
    pub state: DatabaseState,
    pub tables: BTreeMap<String, TableCountResult>,
}

impl DatabaseReport {
    pub fn new(name: impl Into<String>, state: DatabaseState) -> Self {
        Self {
            name: name.into(),
            state,
            tables: BTreeMap::new(),
        }
    }

    pub fn with_results(mut self, results: impl IntoIterator<Item = TableCountResult>) -> Self {
        for result in results {
            self.insert(result);
        }
        self
    }

    fn insert(&mut self, result: TableCountResult) {
        match self.tables.get(&result.table) {
            Some(existing) if *existing >= result => {}
            _ => {
                self.tables.insert(result.table.clone(), result);
            }
        }
    }

    /// Clean when every table matched and nothing went wrong at database level.
    pub fn is_clean(&self) -> bool {
        matches!(
            self.state,
            DatabaseState::Compared | DatabaseState::NothingToCompare
        ) && self
            .tables
            .values()
            .all(|result| result.status == TableStatus::Match)
    }

    pub fn needs_attention(&self) -> Vec<&TableCountResult> {
        self.tables
            .values()
            .filter(|result| result.status != TableStatus::Match)
            .collect()
    }

    pub fn summary_line(&self) -> String {
        if let DatabaseState::Failed { reason, .. } = &self.state {
            if self.tables.is_empty() {
                return format!("{}: failed: {}", self.name, reason);
            }
        }
        if self.state == DatabaseState::NothingToCompare {
            return format!("{}: nothing to compare (no tables on either side)", self.name);
        }
        let attention = self.needs_attention();
        if attention.is_empty() {
            let noun = if self.tables.len() == 1 { "table" } else { "tables" };
            return format!("{}: clean ({} {})", self.name, self.tables.len(), noun);
        }
        let listed = attention
            .iter()
            .map(|result| format!("{} ({})", result.table, result.status.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}: {} of {} tables need attention: {}",
            self.name,
            attention.len(),
            self.tables.len(),
            listed
        )
    }

    fn merge(&mut self, other: DatabaseReport) {
        if other.state.severity() > self.state.severity()
            || (other.state.severity() == self.state.severity() && other.state > self.state)
        {
            self.state = other.state;
        }
        for result in other.tables.into_values() {
            self.insert(result);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObjectTally {
    pub schema: String,
    pub kind: ObjectKind,
    pub source: i64,
    pub destination: i64,
    pub diff: u64,
    pub pass: bool,
}

impl SchemaObjectTally {
    pub fn new(schema: &str, kind: ObjectKind, source: i64, destination: i64, threshold: u64) -> Self {
        let diff = destination.abs_diff(source);
        Self {
            schema: schema.to_string(),
            kind,
            source,
            destination,
            diff,
            pass: diff <= threshold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub databases: BTreeMap<String, DatabaseReport>,
    pub schema_objects: BTreeMap<(ObjectKind, String), SchemaObjectTally>,
    /// Tally kinds or sides that could not be collected.
    pub tally_errors: Vec<String>,
    pub rows_compared: bool,
}

impl Report {
    pub fn add_database(&mut self, database: DatabaseReport) {
        match self.databases.get_mut(&database.name) {
            Some(existing) => existing.merge(database),
            None => {
                self.databases.insert(database.name.clone(), database);
            }
        }
    }

    pub fn add_tally(&mut self, tally: SchemaObjectTally) {
        let key = (tally.kind, tally.schema.clone());
        match self.schema_objects.get(&key) {
            Some(existing) if *existing >= tally => {}
            _ => {
                self.schema_objects.insert(key, tally);
            }
        }
    }

    pub fn add_tally_error(&mut self, error: impl Into<String>) {
        self.tally_errors.push(error.into());
        self.tally_errors.sort();
        self.tally_errors.dedup();
    }

    /// Fold another partial report into this one. Commutative and associative.
    pub fn merge(&mut self, other: Report) {
        for database in other.databases.into_values() {
            self.add_database(database);
        }
        for tally in other.schema_objects.into_values() {
            self.add_tally(tally);
        }
        for error in other.tally_errors {
            self.add_tally_error(error);
        }
        self.rows_compared |= other.rows_compared;
    }

    /// Every table result, ordered by database then table.
    pub fn table_results(&self) -> impl Iterator<Item = &TableCountResult> {
        self.databases
            .values()
            .flat_map(|database| database.tables.values())
    }

    pub fn tallies(&self) -> impl Iterator<Item = &SchemaObjectTally> {
        self.schema_objects.values()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        if !self.rows_compared {
            return vec!["row counts not compared (rows not selected)".to_string()];
        }
        self.databases
            .values()
            .map(DatabaseReport::summary_line)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.databases.values().all(DatabaseReport::is_clean)
            && self.schema_objects.values().all(|tally| tally.pass)
            && self.tally_errors.is_empty()
    }
}

/// Shared accumulator workers fold their results into.
#[derive(Debug, Default)]
pub struct Aggregator {
    report: Mutex<Report>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Report> {
        self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_database(&self, database: DatabaseReport) {
        self.lock().add_database(database);
    }

    pub fn record_tally(&self, tally: SchemaObjectTally) {
        self.lock().add_tally(tally);
    }

    pub fn record_tally_error(&self, error: impl Into<String>) {
        self.lock().add_tally_error(error);
    }

    pub fn mark_rows_compared(&self) {
        self.lock().rows_compared = true;
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.lock().databases.contains_key(name)
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Report {
        self.lock().clone()
    }

    pub fn into_report(self) -> Report {
        self.report
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
