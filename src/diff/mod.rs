pub mod engine;
pub mod enumerate;
pub mod job;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod tally;
pub mod worker;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info};

use crate::db::pool::Pool;
use crate::db::session::Connector;

pub use engine::{DatabaseSelection, Engine};
pub use job::{ComparisonJob, CompareItems, Concurrency, IgnoreList, Selection, Side, SideSpec};
pub use report::{
    ABSENT, Aggregator, DatabaseReport, DatabaseState, Report, SchemaObjectTally, TableCountResult,
    TableStatus,
};
pub use retry::RetryPolicy;

/// Run one comparison between two instances and return the folded report.
///
/// Both connection pools are shut down before returning, bounded by the
/// job's close timeout, whether or not the run succeeded.
///
/// # Errors
///
/// Only run-level failures are returned: no database could be enumerated.
/// Everything that goes wrong for a single database or table is recorded in
/// the report instead.
pub async fn run_job<S: Connector, D: Connector>(
    job: &ComparisonJob,
    source: S,
    destination: D,
) -> Result<Report> {
    let started = Instant::now();
    let job = Arc::new(job.clone());
    let source = Pool::new(source, job.pool.clone(), job.source.snapshot);
    let destination = Pool::new(destination, job.pool.clone(), job.destination.snapshot);

    info!(
        source = source.label(),
        destination = destination.label(),
        max_open_conns = job.pool.max_open,
        max_idle_conns = job.pool.max_idle,
        db_concurrency = job.concurrency.databases,
        table_concurrency = job.concurrency.tables,
        max_retries = job.retry.max_retries(),
        "starting comparison"
    );
    for (side, spec) in [(Side::Source, &job.source), (Side::Destination, &job.destination)] {
        if let Some(marker) = spec.snapshot {
            info!(side = side.as_str(), snapshot = %marker, "reads pinned to snapshot");
        }
    }
    if !job.ignore.is_empty() {
        info!(ignored = ?job.ignore.entries().collect::<Vec<_>>(), "ignoring tables");
    }

    let aggregator = Arc::new(Aggregator::new());
    let outcome = execute(&job, &source, &destination, &aggregator).await;

    let (_, _) = tokio::join!(
        source.shutdown_with_deadline(job.close_timeout),
        destination.shutdown_with_deadline(job.close_timeout)
    );
    debug!(source = ?source.stats(), destination = ?destination.stats(), "connection pool statistics");
    outcome?;

    let report = match Arc::try_unwrap(aggregator) {
        Ok(aggregator) => aggregator.into_report(),
        Err(shared) => shared.snapshot(),
    };
    info!(
        databases = report.databases.len(),
        tables = report.table_results().count(),
        clean = report.is_clean(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "comparison finished"
    );
    Ok(report)
}

async fn execute<S: Connector, D: Connector>(
    job: &Arc<ComparisonJob>,
    source: &Pool<S>,
    destination: &Pool<D>,
    aggregator: &Arc<Aggregator>,
) -> Result<()> {
    let selections = if job.compare.rows {
        match &job.selection {
            Selection::Patterns(patterns) => {
                enumerate::list_databases(source, patterns, job.query_timeout)
                    .await?
                    .into_iter()
                    .map(|name| DatabaseSelection { name, tables: None })
                    .collect()
            }
            Selection::Tables(tables) => tables
                .iter()
                .map(|(name, tables)| DatabaseSelection {
                    name: name.clone(),
                    tables: Some(tables.clone()),
                })
                .collect(),
        }
    } else {
        Vec::new()
    };

    if job.compare.any_tally() {
        tally::run(
            source,
            destination,
            &job.compare.tally_kinds(),
            job.threshold,
            job.query_timeout,
            aggregator,
        )
        .await;
    }

    if !job.compare.rows {
        info!("row counts not selected, skipping");
        return Ok(());
    }
    aggregator.mark_rows_compared();
    info!(
        databases = selections.len(),
        method = job.count_method.as_str(),
        "comparing row counts"
    );
    let engine = Arc::new(Engine::new(
        Arc::clone(job),
        source.clone(),
        destination.clone(),
        Arc::clone(aggregator),
    ));
    engine.run(selections).await;
    Ok(())
}
