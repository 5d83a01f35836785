//! Row-count fan-out: a database-level worker pool, and per database two
//! independent table-level pools (one per side).

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::db::pool::Pool;
use crate::db::session::{Connector, CountMethod, Session};
use crate::diff::enumerate::{DatabaseTarget, filter_tables, list_tables};
use crate::diff::job::{ComparisonJob, Side};
use crate::diff::progress::ProgressTracker;
use crate::diff::reconcile::reconcile;
use crate::diff::report::{Aggregator, DatabaseReport, DatabaseState, TableCountResult, TableStatus};
use crate::diff::retry::RetryPolicy;
use crate::diff::worker::WorkerPool;
use crate::error::{ErrorKind, classify_error};

/// A database to check; `tables` is set when the job names tables explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSelection {
    pub name: String,
    pub tables: Option<Vec<String>>,
}

type CountOutcome = Result<i64, String>;

pub struct Engine<S: Connector, D: Connector> {
    job: Arc<ComparisonJob>,
    source: Pool<S>,
    destination: Pool<D>,
    progress: Arc<ProgressTracker>,
    aggregator: Arc<Aggregator>,
}

impl<S: Connector, D: Connector> Engine<S, D> {
    pub fn new(
        job: Arc<ComparisonJob>,
        source: Pool<S>,
        destination: Pool<D>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            job,
            source,
            destination,
            progress: Arc::new(ProgressTracker::new()),
            aggregator,
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Check every selected database, at most `concurrency.databases` at once.
    pub async fn run(self: Arc<Self>, databases: Vec<DatabaseSelection>) {
        let names: Vec<String> = databases.iter().map(|db| db.name.clone()).collect();
        self.progress.register_databases(names.len());

        let pool = WorkerPool::new("databases", self.job.concurrency.databases);
        let engine = Arc::clone(&self);
        pool.run(databases, move |selection| {
            let engine = Arc::clone(&engine);
            async move {
                let name = selection.name.clone();
                let report = engine.check_database(selection).await;
                engine.aggregator.record_database(report);
                engine.progress.database_finished(&name);
            }
        })
        .await;

        for name in names {
            if !self.aggregator.has_database(&name) {
                self.aggregator.record_database(DatabaseReport::new(
                    name,
                    DatabaseState::Failed {
                        kind: ErrorKind::Internal,
                        reason: "database check stopped before reporting".to_string(),
                    },
                ));
            }
        }
    }

    async fn check_database(&self, selection: DatabaseSelection) -> DatabaseReport {
        let database = selection.name.as_str();
        let query_timeout = self.job.query_timeout;
        let (source_tables, destination_tables) = match selection.tables {
            Some(tables) => (tables.clone(), tables),
            None => {
                let (src, dst) = tokio::join!(
                    list_tables(&self.source, database, query_timeout),
                    list_tables(&self.destination, database, query_timeout)
                );
                match (src, dst) {
                    (Ok(src), Ok(dst)) => (src, dst),
                    (Err(err), _) | (_, Err(err)) => {
                        error!(database, error = %err, "could not list tables");
                        return DatabaseReport::new(
                            database,
                            DatabaseState::Failed {
                                kind: match classify_error(&err) {
                                    ErrorKind::Internal => ErrorKind::SchemaEnumeration,
                                    kind => kind,
                                },
                                reason: err.to_string(),
                            },
                        );
                    }
                }
            }
        };

        let source_tables = filter_tables(database, source_tables, &self.job.ignore);
        let destination_tables = filter_tables(database, destination_tables, &self.job.ignore);
        let reconciled = reconcile(&source_tables, &destination_tables);

        if !reconciled.is_symmetric() {
            error!(
                database,
                only_in_source = ?reconciled.only_in_source,
                only_in_destination = ?reconciled.only_in_destination,
                "table sets differ, skipping row counts"
            );
            let missing = reconciled
                .only_in_source
                .iter()
                .map(|table| TableCountResult::missing_in_destination(database, table))
                .chain(
                    reconciled
                        .only_in_destination
                        .iter()
                        .map(|table| TableCountResult::missing_in_source(database, table)),
                );
            return DatabaseReport::new(database, DatabaseState::TableSetMismatch)
                .with_results(missing);
        }

        if reconciled.common.is_empty() {
            info!(database, "no tables on either side, nothing to compare");
            return DatabaseReport::new(database, DatabaseState::NothingToCompare);
        }

        self.count_database(DatabaseTarget {
            name: database.to_string(),
            tables: reconciled.common,
        })
        .await
    }

    async fn count_database(&self, target: DatabaseTarget) -> DatabaseReport {
        let database = target.name.as_str();
        info!(
            database,
            tables = target.tables.len(),
            method = self.job.count_method.as_str(),
            "counting rows"
        );

        let abort = Arc::new(OnceLock::new());
        let width = self.job.concurrency.tables;
        let source = self.counter(self.source.clone(), Side::Source, database, &abort);
        let destination = self.counter(self.destination.clone(), Side::Destination, database, &abort);
        let (source_counts, destination_counts) = tokio::join!(
            count_side(source, target.tables.clone(), width),
            count_side(destination, target.tables.clone(), width)
        );

        let threshold = self.job.threshold;
        let results = target.tables.iter().map(|table| {
            let src = source_counts.get(table);
            let dst = destination_counts.get(table);
            match (src, dst) {
                (Some(Ok(src)), Some(Ok(dst))) => {
                    let result = TableCountResult::compared(database, table, *src, *dst, threshold);
                    if result.status == TableStatus::Mismatch {
                        error!(
                            database,
                            table = table.as_str(),
                            source = *src,
                            destination = *dst,
                            diff = result.abs_diff.unwrap_or_default(),
                            threshold,
                            "row counts differ beyond threshold"
                        );
                    }
                    result
                }
                (src, dst) => {
                    let known = |outcome: Option<&CountOutcome>| outcome.and_then(|o| o.as_ref().ok()).copied();
                    let errors: Vec<String> = [(Side::Source, src), (Side::Destination, dst)]
                        .into_iter()
                        .filter_map(|(side, outcome)| match outcome {
                            Some(Err(err)) => Some(format!("{}: {}", side.as_str(), err)),
                            None => Some(format!("{}: not counted", side.as_str())),
                            Some(Ok(_)) => None,
                        })
                        .collect();
                    TableCountResult::failed(database, table, known(src), known(dst), errors.join("; "))
                }
            }
        });
        let results: Vec<TableCountResult> = results.collect();

        let state = match abort.get() {
            Some(reason) => DatabaseState::Failed {
                kind: ErrorKind::SnapshotPin,
                reason: reason.clone(),
            },
            None => DatabaseState::Compared,
        };
        DatabaseReport::new(database, state).with_results(results)
    }

    fn counter<C: Connector>(
        &self,
        pool: Pool<C>,
        side: Side,
        database: &str,
        abort: &Arc<OnceLock<String>>,
    ) -> Arc<SideCounter<C>> {
        Arc::new(SideCounter {
            pool,
            side,
            database: database.to_string(),
            method: self.job.count_method,
            retry: self.job.retry,
            query_timeout: self.job.query_timeout,
            abort: Arc::clone(abort),
            progress: Arc::clone(&self.progress),
        })
    }
}

/// Counts the tables of one database on one side.
struct SideCounter<C: Connector> {
    pool: Pool<C>,
    side: Side,
    database: String,
    method: CountMethod,
    retry: RetryPolicy,
    query_timeout: Duration,
    /// Set by the first snapshot-pin failure on either side of the database.
    abort: Arc<OnceLock<String>>,
    progress: Arc<ProgressTracker>,
}

impl<C: Connector> SideCounter<C> {
    /// Attempts run strictly one after another. A failed attempt discards
    /// its session; a snapshot-pin failure aborts the whole database.
    async fn count_table(&self, table: &str) -> CountOutcome {
        let database = self.database.as_str();
        let side = self.side.as_str();
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts() {
            if let Some(reason) = self.abort.get() {
                return Err(format!("skipped, database aborted: {}", reason));
            }
            if attempt > 1 {
                let delay = self.retry.delay(attempt - 1);
                warn!(
                    database,
                    table,
                    side,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "retrying row count"
                );
                tokio::time::sleep(delay).await;
            }

            let mut lease = match self.pool.lease().await {
                Ok(lease) => lease,
                Err(err) if classify_error(&err) == ErrorKind::SnapshotPin => {
                    let reason = err.to_string();
                    if self.abort.set(reason.clone()).is_ok() {
                        error!(database, side, error = %reason, "snapshot pin failed, aborting database");
                    }
                    return Err(reason);
                }
                Err(err) => {
                    debug!(database, table, side, error = %err, "lease failed");
                    last_error = err.to_string();
                    continue;
                }
            };

            let count = lease
                .session_mut()
                .count_rows(database, table, self.method);
            match timeout(self.query_timeout, count).await {
                Ok(Ok(count)) => {
                    lease.release();
                    return Ok(count);
                }
                Ok(Err(err)) => {
                    lease.invalidate();
                    last_error = err.to_string();
                }
                Err(_) => {
                    lease.invalidate();
                    last_error = format!("row count timed out after {:?}", self.query_timeout);
                }
            }
        }

        error!(
            database,
            table,
            side,
            attempts = self.retry.max_attempts(),
            error = %last_error,
            "row count failed"
        );
        Err(last_error)
    }
}

async fn count_side<C: Connector>(
    counter: Arc<SideCounter<C>>,
    tables: Vec<String>,
    width: usize,
) -> BTreeMap<String, CountOutcome> {
    counter
        .progress
        .register(&counter.database, counter.side, tables.len());
    let pool = WorkerPool::new(
        format!("{}/{}", counter.database, counter.side.as_str()),
        width,
    );
    let worker = Arc::clone(&counter);
    let results = pool
        .run(tables.clone(), move |table| {
            let counter = Arc::clone(&worker);
            async move {
                let outcome = counter.count_table(&table).await;
                counter.progress.record(&counter.database, counter.side);
                (table, outcome)
            }
        })
        .await;

    debug!(
        database = %counter.database,
        side = counter.side.as_str(),
        peak_in_flight = pool.peak_in_flight(),
        "side finished"
    );
    let mut out: BTreeMap<String, CountOutcome> = results.into_iter().collect();
    for table in tables {
        out.entry(table)
            .or_insert_with(|| Err("count task stopped before finishing".to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::instance::InstanceDescriptor;
    use crate::db::pool::PoolOptions;
    use crate::db::session::SnapshotMarker;
    use crate::diff::job::{Selection, SideSpec};
    use crate::testing::MemoryCluster;

    fn job() -> ComparisonJob {
        let side = |host: &str| {
            SideSpec::new(InstanceDescriptor::parse(&format!("mysql://root@{host}")).expect("parse"))
        };
        let mut job = ComparisonJob::new(side("src"), side("dst"), Selection::Patterns(vec!["%".into()]));
        job.retry = RetryPolicy::new(2, Duration::from_millis(1));
        job.query_timeout = Duration::from_millis(200);
        job
    }

    fn engine(
        job: ComparisonJob,
        source: MemoryCluster,
        destination: MemoryCluster,
        snapshot: Option<SnapshotMarker>,
    ) -> (Arc<Engine<MemoryCluster, MemoryCluster>>, Arc<Aggregator>) {
        let aggregator = Arc::new(Aggregator::new());
        let options = PoolOptions::derive(1, 4);
        let engine = Engine::new(
            Arc::new(job),
            Pool::new(source, options.clone(), snapshot),
            Pool::new(destination, options, None),
            Arc::clone(&aggregator),
        );
        (Arc::new(engine), aggregator)
    }

    fn selection(name: &str) -> DatabaseSelection {
        DatabaseSelection {
            name: name.to_string(),
            tables: None,
        }
    }

    #[tokio::test]
    async fn pin_failure_aborts_remaining_tables() {
        let mut job = job();
        job.concurrency.tables = 1;
        let source = MemoryCluster::new("src")
            .table("db1", "a", 1)
            .table("db1", "b", 1)
            .table("db1", "c", 1);
        let destination = MemoryCluster::new("dst")
            .table("db1", "a", 1)
            .table("db1", "b", 1)
            .table("db1", "c", 1);
        // Explicit tables skip listing, so the first pin happens while counting.
        let source = source.fail_pin();
        let (engine, aggregator) = engine(job, source.clone(), destination, Some(SnapshotMarker(9)));

        let db = DatabaseSelection {
            name: "db1".to_string(),
            tables: Some(vec!["a".into(), "b".into(), "c".into()]),
        };
        Arc::clone(&engine).run(vec![db]).await;
        drop(engine);

        let report = Arc::try_unwrap(aggregator).expect("sole owner").into_report();
        let db1 = &report.databases["db1"];
        assert!(matches!(db1.state, DatabaseState::Failed { .. }));
        assert_eq!(db1.tables.len(), 3);
        assert!(db1.tables.values().all(|t| t.status == TableStatus::Failed));
        assert_eq!(source.pin_calls(), 1);
        assert_eq!(source.total_attempts(), 0);
    }

    #[tokio::test]
    async fn listing_failure_fails_only_that_database() {
        let source = MemoryCluster::new("src").table("db1", "t", 1).fail_listing();
        let destination = MemoryCluster::new("dst").table("db1", "t", 1);
        let (engine, aggregator) = engine(job(), source, destination, None);

        Arc::clone(&engine).run(vec![selection("db1")]).await;
        drop(engine);

        let report = Arc::try_unwrap(aggregator).expect("sole owner").into_report();
        assert!(matches!(
            report.databases["db1"].state,
            DatabaseState::Failed { .. }
        ));
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn progress_counts_every_table_once_per_side() {
        let source = MemoryCluster::new("src").table("db1", "a", 1).table("db1", "b", 2);
        let destination = MemoryCluster::new("dst").table("db1", "a", 1).table("db1", "b", 2);
        let (engine, _aggregator) = engine(job(), source, destination, None);

        Arc::clone(&engine).run(vec![selection("db1")]).await;

        let progress = engine.progress();
        assert_eq!(progress.completed("db1"), 4);
        assert_eq!(
            progress.get("db1", Side::Source).map(|p| p.is_done()),
            Some(true)
        );
        assert_eq!(progress.databases().completed, 1);
    }
}
