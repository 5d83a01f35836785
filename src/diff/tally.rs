//! Per-schema counts of tables, indexes and views, compared across instances.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::db::pool::Pool;
use crate::db::session::{Connector, ObjectKind, Session};
use crate::diff::report::{Aggregator, SchemaObjectTally};
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideTally {
    pub counts: BTreeMap<ObjectKind, BTreeMap<String, i64>>,
    /// Kinds this instance cannot report, such as indexes on plain MySQL.
    pub unavailable: BTreeSet<ObjectKind>,
}

impl SideTally {
    fn schemas(&self) -> impl Iterator<Item = &String> {
        self.counts.values().flat_map(|per_schema| per_schema.keys())
    }

    fn get(&self, kind: ObjectKind, schema: &str) -> i64 {
        self.counts
            .get(&kind)
            .and_then(|per_schema| per_schema.get(schema))
            .copied()
            .unwrap_or(0)
    }
}

/// One metadata query per kind, each on its own lease. Index counts are best
/// effort: a failure there marks indexes unavailable instead of failing.
pub async fn collect<C: Connector>(
    pool: &Pool<C>,
    kinds: &[ObjectKind],
    query_timeout: Duration,
) -> Result<SideTally> {
    let mut tally = SideTally::default();
    for &kind in kinds {
        let mut lease = pool.lease().await?;
        let outcome = match timeout(query_timeout, lease.session_mut().object_tally(kind)).await {
            Ok(Ok(counts)) => {
                lease.release();
                Ok(counts)
            }
            Ok(Err(err)) => {
                lease.invalidate();
                Err(err)
            }
            Err(_) => {
                lease.invalidate();
                Err(AppError::new(
                    ErrorKind::Timeout,
                    format!(
                        "Counting {} on {} timed out after {}s",
                        kind.as_str(),
                        pool.label(),
                        query_timeout.as_secs()
                    ),
                )
                .into())
            }
        };
        match outcome {
            Ok(counts) => {
                tally.counts.insert(kind, counts);
            }
            Err(err) if kind == ObjectKind::Indexes => {
                warn!(
                    instance = pool.label(),
                    error = %err,
                    "index metadata unavailable, skipping index comparison"
                );
                tally.unavailable.insert(kind);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(tally)
}

/// Diff every schema seen on either side, for each requested kind both
/// sides could report. A schema absent on one side counts as zero there.
pub fn compare(
    source: &SideTally,
    destination: &SideTally,
    kinds: &[ObjectKind],
    threshold: u64,
) -> Vec<SchemaObjectTally> {
    let schemas: BTreeSet<&String> = source.schemas().chain(destination.schemas()).collect();
    let mut out = Vec::new();
    for &kind in kinds {
        if source.unavailable.contains(&kind) || destination.unavailable.contains(&kind) {
            continue;
        }
        for schema in &schemas {
            out.push(SchemaObjectTally::new(
                schema,
                kind,
                source.get(kind, schema),
                destination.get(kind, schema),
                threshold,
            ));
        }
    }
    out
}

/// Collect both sides concurrently and fold the comparison into `aggregator`.
pub async fn run<S: Connector, D: Connector>(
    source: &Pool<S>,
    destination: &Pool<D>,
    kinds: &[ObjectKind],
    threshold: u64,
    query_timeout: Duration,
    aggregator: &Aggregator,
) {
    if kinds.is_empty() {
        return;
    }
    let (src, dst) = tokio::join!(
        collect(source, kinds, query_timeout),
        collect(destination, kinds, query_timeout)
    );
    let (src, dst) = match (src, dst) {
        (Ok(src), Ok(dst)) => (src, dst),
        (src, dst) => {
            for (label, result) in [(source.label(), src.err()), (destination.label(), dst.err())] {
                if let Some(err) = result {
                    error!(instance = label, error = %err, "schema object tally failed");
                    aggregator.record_tally_error(format!("{}: {}", label, err));
                }
            }
            return;
        }
    };

    let results = compare(&src, &dst, kinds, threshold);
    let failing = results.iter().filter(|tally| !tally.pass).count();
    for tally in results {
        if !tally.pass {
            error!(
                schema = %tally.schema,
                kind = tally.kind.as_str(),
                source = tally.source,
                destination = tally.destination,
                diff = tally.diff,
                "schema object counts differ"
            );
        }
        aggregator.record_tally(tally);
    }
    info!(failing, "schema object tally finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::PoolOptions;
    use crate::testing::MemoryCluster;

    fn side(kind: ObjectKind, entries: &[(&str, i64)]) -> SideTally {
        let mut tally = SideTally::default();
        tally.counts.insert(
            kind,
            entries.iter().map(|(s, n)| (s.to_string(), *n)).collect(),
        );
        tally
    }

    #[test]
    fn missing_schemas_count_as_zero() {
        let src = side(ObjectKind::Views, &[("a", 2), ("b", 1)]);
        let dst = side(ObjectKind::Views, &[("a", 2), ("c", 4)]);
        let out = compare(&src, &dst, &[ObjectKind::Views], 0);

        let by_schema: BTreeMap<_, _> = out.iter().map(|t| (t.schema.as_str(), t)).collect();
        assert!(by_schema["a"].pass);
        assert_eq!(by_schema["b"].destination, 0);
        assert!(!by_schema["b"].pass);
        assert_eq!(by_schema["c"].diff, 4);
    }

    #[test]
    fn threshold_applies_to_object_counts() {
        let src = side(ObjectKind::Tables, &[("a", 10)]);
        let dst = side(ObjectKind::Tables, &[("a", 12)]);
        assert!(compare(&src, &dst, &[ObjectKind::Tables], 2)[0].pass);
        assert!(!compare(&src, &dst, &[ObjectKind::Tables], 1)[0].pass);
    }

    #[test]
    fn unavailable_kinds_are_skipped() {
        let src = side(ObjectKind::Tables, &[("a", 1)]);
        let mut dst = side(ObjectKind::Tables, &[("a", 1)]);
        dst.unavailable.insert(ObjectKind::Indexes);
        let out = compare(&src, &dst, &[ObjectKind::Tables, ObjectKind::Indexes], 0);
        assert!(out.iter().all(|t| t.kind == ObjectKind::Tables));
    }

    #[tokio::test]
    async fn collects_without_index_metadata() {
        let cluster = MemoryCluster::new("mysql")
            .table("db1", "t1", 1)
            .indexes("db1", 3)
            .without_index_metadata();
        let pool = Pool::new(cluster, PoolOptions::derive(1, 1), None);

        let tally = collect(&pool, &ObjectKind::ALL, Duration::from_secs(5))
            .await
            .expect("tally");
        assert!(tally.unavailable.contains(&ObjectKind::Indexes));
        assert_eq!(tally.get(ObjectKind::Tables, "db1"), 1);
        assert_eq!(pool.stats().invalidated, 1);
    }
}
