use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;

use crate::diff::job::Side;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            return 100;
        }
        (self.completed * 100 / self.total).min(100)
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Log every 10th completion, whenever the whole percentage moves, and at the end.
fn should_log(completed: usize, total: usize) -> bool {
    if completed % 10 == 0 || completed == total {
        return true;
    }
    total > 0 && completed * 100 / total != (completed - 1) * 100 / total
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<(String, Side), Progress>,
    databases: Progress,
}

/// Completed-task counters per database and side. Counters only grow.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_databases(&self, total: usize) {
        self.lock().databases.total = total;
    }

    pub fn register(&self, database: &str, side: Side, total: usize) {
        self.lock()
            .tables
            .entry((database.to_string(), side))
            .or_default()
            .total = total;
    }

    /// Record one finished table count and return the updated counter.
    pub fn record(&self, database: &str, side: Side) -> Progress {
        let progress = {
            let mut inner = self.lock();
            let entry = inner
                .tables
                .entry((database.to_string(), side))
                .or_default();
            entry.completed += 1;
            *entry
        };
        if should_log(progress.completed, progress.total) {
            info!(
                database,
                side = side.as_str(),
                completed = progress.completed,
                total = progress.total,
                "table counts {}%",
                progress.percent()
            );
        }
        progress
    }

    pub fn database_finished(&self, database: &str) -> Progress {
        let progress = {
            let mut inner = self.lock();
            inner.databases.completed += 1;
            inner.databases
        };
        info!(
            database,
            completed = progress.completed,
            total = progress.total,
            "finished database [{}/{}]",
            progress.completed,
            progress.total
        );
        progress
    }

    pub fn get(&self, database: &str, side: Side) -> Option<Progress> {
        self.lock().tables.get(&(database.to_string(), side)).copied()
    }

    /// Completed table counts for a database across both sides.
    pub fn completed(&self, database: &str) -> usize {
        self.lock()
            .tables
            .iter()
            .filter(|((db, _), _)| db == database)
            .map(|(_, progress)| progress.completed)
            .sum()
    }

    pub fn databases(&self) -> Progress {
        self.lock().databases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_on_tens_percent_steps_and_completion() {
        assert!(should_log(10, 1000));
        assert!(!should_log(11, 1000));
        assert!(should_log(20, 2000));
        assert!(should_log(1000, 1000));
        assert!(should_log(1, 3));
    }

    #[test]
    fn counters_grow_per_side() {
        let tracker = ProgressTracker::new();
        tracker.register("db1", Side::Source, 2);
        tracker.register("db1", Side::Destination, 2);

        tracker.record("db1", Side::Source);
        let progress = tracker.record("db1", Side::Source);
        assert_eq!(progress, Progress { completed: 2, total: 2 });
        assert!(progress.is_done());

        tracker.record("db1", Side::Destination);
        assert_eq!(tracker.completed("db1"), 3);
        assert_eq!(tracker.get("db1", Side::Destination).map(|p| p.percent()), Some(50));
        assert_eq!(tracker.get("db2", Side::Source), None);
    }
}
