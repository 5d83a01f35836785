//! In-memory cluster implementing the session traits, for tests and demos.
//!
//! Tables, row counts and object tallies are configured with builder
//! methods. Failures and delays can be injected per table, and the cluster
//! records what the engine did to it: attempts per table, the highest number
//! of concurrent count queries per database, sessions opened and closed, and
//! whether snapshot pins were issued in the right place.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::session::{Connector, CountMethod, ObjectKind, Session, SnapshotMarker};
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone, Default)]
struct TableSpec {
    rows: i64,
    statistics: Option<i64>,
    failures_left: u32,
    always_fail: bool,
    delay: Duration,
}

#[derive(Debug, Default)]
struct Schema {
    tables: BTreeMap<String, TableSpec>,
    views: i64,
    indexes: i64,
}

#[derive(Debug, Default)]
struct Metrics {
    attempts: HashMap<(String, String), u32>,
    in_flight: HashMap<String, usize>,
    peak_in_flight: HashMap<String, usize>,
    sessions_opened: usize,
    sessions_closed: usize,
    pin_calls: usize,
    pin_violations: usize,
    unpinned_reads: usize,
}

#[derive(Debug)]
struct State {
    label: String,
    schemas: BTreeMap<String, Schema>,
    index_metadata: bool,
    fail_pin: bool,
    fail_connect: bool,
    fail_listing: bool,
    delay: Duration,
    metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                label: label.into(),
                schemas: BTreeMap::new(),
                index_metadata: true,
                fail_pin: false,
                fail_connect: false,
                fail_listing: false,
                delay: Duration::ZERO,
                metrics: Metrics::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_table(self, database: &str, table: &str, edit: impl FnOnce(&mut TableSpec)) -> Self {
        {
            let mut state = self.lock();
            let spec = state
                .schemas
                .entry(database.to_string())
                .or_default()
                .tables
                .entry(table.to_string())
                .or_default();
            edit(spec);
        }
        self
    }

    /// Add a database with no tables.
    pub fn database(self, database: &str) -> Self {
        self.lock().schemas.entry(database.to_string()).or_default();
        self
    }

    pub fn table(self, database: &str, table: &str, rows: i64) -> Self {
        self.with_table(database, table, |spec| spec.rows = rows)
    }

    /// Row estimate returned for statistics-based counts (defaults to the exact count).
    pub fn statistics(self, database: &str, table: &str, rows: i64) -> Self {
        self.with_table(database, table, |spec| spec.statistics = Some(rows))
    }

    /// Fail the first `times` count attempts against a table.
    pub fn fail_table(self, database: &str, table: &str, times: u32) -> Self {
        self.with_table(database, table, |spec| spec.failures_left = times)
    }

    pub fn fail_table_always(self, database: &str, table: &str) -> Self {
        self.with_table(database, table, |spec| spec.always_fail = true)
    }

    pub fn delay_table(self, database: &str, table: &str, delay: Duration) -> Self {
        self.with_table(database, table, |spec| spec.delay = delay)
    }

    /// Delay applied to every count query.
    pub fn delay_all(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    pub fn views(self, database: &str, views: i64) -> Self {
        self.lock().schemas.entry(database.to_string()).or_default().views = views;
        self
    }

    pub fn indexes(self, database: &str, indexes: i64) -> Self {
        self.lock().schemas.entry(database.to_string()).or_default().indexes = indexes;
        self
    }

    /// Behave like a MySQL server without the `TIDB_INDEXES` view.
    pub fn without_index_metadata(self) -> Self {
        self.lock().index_metadata = false;
        self
    }

    pub fn fail_pin(self) -> Self {
        self.lock().fail_pin = true;
        self
    }

    pub fn fail_connect(self) -> Self {
        self.lock().fail_connect = true;
        self
    }

    pub fn fail_listing(self) -> Self {
        self.lock().fail_listing = true;
        self
    }

    pub fn attempts(&self, database: &str, table: &str) -> u32 {
        self.lock()
            .metrics
            .attempts
            .get(&(database.to_string(), table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.lock().metrics.attempts.values().sum()
    }

    pub fn peak_in_flight(&self, database: &str) -> usize {
        self.lock()
            .metrics
            .peak_in_flight
            .get(database)
            .copied()
            .unwrap_or(0)
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().metrics.sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.lock().metrics.sessions_closed
    }

    pub fn pin_calls(&self) -> usize {
        self.lock().metrics.pin_calls
    }

    /// Pins issued twice on one session, or after another statement.
    pub fn pin_violations(&self) -> usize {
        self.lock().metrics.pin_violations
    }

    /// Statements executed on a session that was never pinned.
    pub fn unpinned_reads(&self) -> usize {
        self.lock().metrics.unpinned_reads
    }
}

#[async_trait]
impl Connector for MemoryCluster {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession> {
        let mut state = self.lock();
        if state.fail_connect {
            return Err(AppError::new(
                ErrorKind::Connection,
                format!("connection to {} refused", state.label),
            )
            .into());
        }
        state.metrics.sessions_opened += 1;
        Ok(MemorySession {
            cluster: self.clone(),
            statements: 0,
            pinned: false,
        })
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.lock().label)
    }
}

pub struct MemorySession {
    cluster: MemoryCluster,
    statements: usize,
    pinned: bool,
}

impl MemorySession {
    fn statement(&mut self) -> MutexGuard<'_, State> {
        self.statements += 1;
        let mut state = self.cluster.lock();
        if !self.pinned {
            state.metrics.unpinned_reads += 1;
        }
        state
    }
}

/// Decrements the per-database in-flight gauge even when the query future is
/// dropped by a timeout.
struct InFlight {
    cluster: MemoryCluster,
    database: String,
}

impl InFlight {
    fn enter(cluster: &MemoryCluster, database: &str) -> Self {
        let mut state = cluster.lock();
        let metrics = &mut state.metrics;
        let current = metrics.in_flight.entry(database.to_string()).or_insert(0);
        *current += 1;
        let now = *current;
        let peak = metrics
            .peak_in_flight
            .entry(database.to_string())
            .or_insert(0);
        *peak = (*peak).max(now);
        Self {
            cluster: cluster.clone(),
            database: database.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.cluster.lock();
        if let Some(current) = state.metrics.in_flight.get_mut(&self.database) {
            *current = current.saturating_sub(1);
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn pin_snapshot(&mut self, marker: SnapshotMarker) -> Result<()> {
        let mut state = self.cluster.lock();
        state.metrics.pin_calls += 1;
        if self.pinned || self.statements > 0 {
            state.metrics.pin_violations += 1;
        }
        if state.fail_pin {
            return Err(AppError::new(
                ErrorKind::SnapshotPin,
                format!("invalid snapshot {} on {}", marker, state.label),
            )
            .into());
        }
        self.pinned = true;
        Ok(())
    }

    async fn list_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        let state = self.statement();
        if state.fail_listing {
            return Err(AppError::new(
                ErrorKind::SchemaEnumeration,
                format!("listing databases on {} failed", state.label),
            )
            .into());
        }
        Ok(state
            .schemas
            .keys()
            .filter(|name| like_match(pattern, name))
            .cloned()
            .collect())
    }

    async fn list_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let state = self.statement();
        if state.fail_listing {
            return Err(AppError::new(
                ErrorKind::SchemaEnumeration,
                format!("listing tables of {} on {} failed", database, state.label),
            )
            .into());
        }
        Ok(state
            .schemas
            .get(database)
            .map(|schema| schema.tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_rows(
        &mut self,
        database: &str,
        table: &str,
        method: CountMethod,
    ) -> Result<i64> {
        let (spec, delay) = {
            let mut state = self.statement();
            *state
                .metrics
                .attempts
                .entry((database.to_string(), table.to_string()))
                .or_insert(0) += 1;
            let global_delay = state.delay;
            let spec = state
                .schemas
                .get_mut(database)
                .and_then(|schema| schema.tables.get_mut(table))
                .map(|spec| {
                    let snapshot = spec.clone();
                    if spec.failures_left > 0 {
                        spec.failures_left -= 1;
                    }
                    snapshot
                });
            let delay = spec
                .as_ref()
                .map(|spec| spec.delay)
                .unwrap_or_default()
                .max(global_delay);
            (spec, delay)
        };

        let _gauge = InFlight::enter(&self.cluster, database);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(spec) = spec else {
            return Err(AppError::new(
                ErrorKind::Query,
                format!("Table '{}.{}' doesn't exist", database, table),
            )
            .into());
        };
        if spec.always_fail || spec.failures_left > 0 {
            return Err(AppError::new(
                ErrorKind::Query,
                format!("injected failure counting {}.{}", database, table),
            )
            .into());
        }
        Ok(match method {
            CountMethod::Exact => spec.rows,
            CountMethod::Statistics => spec.statistics.unwrap_or(spec.rows),
        })
    }

    async fn object_tally(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, i64>> {
        let state = self.statement();
        if kind == ObjectKind::Indexes && !state.index_metadata {
            return Err(AppError::new(
                ErrorKind::Query,
                "Unknown table 'TIDB_INDEXES' in information_schema",
            )
            .into());
        }
        Ok(state
            .schemas
            .iter()
            .map(|(name, schema)| {
                let count = match kind {
                    ObjectKind::Tables => schema.tables.len() as i64,
                    ObjectKind::Indexes => schema.indexes,
                    ObjectKind::Views => schema.views,
                };
                (name.clone(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn close(self) -> Result<()> {
        self.cluster.lock().metrics.sessions_closed += 1;
        Ok(())
    }
}

/// SQL `LIKE` matching with `%` and `_` wildcards.
fn like_match(pattern: &str, value: &str) -> bool {
    fn matches(p: &[char], v: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|skip| matches(rest, &v[skip..])),
            Some(('_', rest)) => !v.is_empty() && matches(rest, &v[1..]),
            Some((ch, rest)) => v.first() == Some(ch) && matches(rest, &v[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    matches(&p, &v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns() {
        assert!(like_match("%", "anything"));
        assert!(like_match("app_%", "app_1"));
        assert!(like_match("db_", "db1"));
        assert!(!like_match("db_", "db12"));
        assert!(!like_match("app%", "xapp"));
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let cluster = MemoryCluster::new("c").table("db", "t", 3).fail_table("db", "t", 1);
        let mut session = cluster.connect().await.expect("connect");

        assert!(session.count_rows("db", "t", CountMethod::Exact).await.is_err());
        assert_eq!(
            session.count_rows("db", "t", CountMethod::Exact).await.expect("count"),
            3
        );
        assert_eq!(cluster.attempts("db", "t"), 2);
    }

    #[tokio::test]
    async fn tallies_skip_empty_schemas() {
        let cluster = MemoryCluster::new("c")
            .table("db1", "t1", 1)
            .views("db2", 2)
            .database("db3");
        let mut session = cluster.connect().await.expect("connect");

        let tables = session.object_tally(ObjectKind::Tables).await.expect("tables");
        assert_eq!(tables.get("db1"), Some(&1));
        assert!(!tables.contains_key("db3"));
        let views = session.object_tally(ObjectKind::Views).await.expect("views");
        assert_eq!(views.get("db2"), Some(&2));
    }
}
