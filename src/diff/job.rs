//! The immutable description of one comparison run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::db::instance::InstanceDescriptor;
use crate::db::pool::PoolOptions;
use crate::db::session::{CountMethod, ObjectKind, SnapshotMarker};
use crate::diff::retry::RetryPolicy;
use crate::error::AppError;

pub const DEFAULT_DB_CONCURRENCY: usize = 5;
pub const DEFAULT_TABLE_CONCURRENCY: usize = 30;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Destination => "destination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideSpec {
    pub instance: InstanceDescriptor,
    pub snapshot: Option<SnapshotMarker>,
}

impl SideSpec {
    pub fn new(instance: InstanceDescriptor) -> Self {
        Self {
            instance,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotMarker) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Which databases and tables a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Selection {
    /// `LIKE` patterns matched against the source instance's databases.
    Patterns(Vec<String>),
    /// Explicit tables grouped by database; both sides use the same list.
    Tables(BTreeMap<String, Vec<String>>),
}

/// Tables excluded from row-count comparison, either by bare name (any
/// database) or as `db.table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IgnoreList(BTreeSet<String>);

impl IgnoreList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            entries
                .into_iter()
                .map(|entry| entry.as_ref().trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect(),
        )
    }

    pub fn is_ignored(&self, database: &str, table: &str) -> bool {
        self.0.contains(table) || self.0.contains(&format!("{}.{}", database, table))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompareItems {
    pub rows: bool,
    pub tables: bool,
    pub indexes: bool,
    pub views: bool,
}

impl Default for CompareItems {
    fn default() -> Self {
        Self {
            rows: true,
            tables: true,
            indexes: true,
            views: true,
        }
    }
}

impl CompareItems {
    /// An empty list selects everything.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let items: Vec<String> = items
            .iter()
            .map(|item| item.as_ref().trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect();
        if items.is_empty() {
            return Ok(Self::default());
        }
        let mut out = Self {
            rows: false,
            tables: false,
            indexes: false,
            views: false,
        };
        for item in items {
            match item.as_str() {
                "rows" => out.rows = true,
                "tables" => out.tables = true,
                "indexes" => out.indexes = true,
                "views" => out.views = true,
                other => {
                    return Err(AppError::config(format!(
                        "Unknown compare item '{}' (expected rows, tables, indexes or views)",
                        other
                    ))
                    .into());
                }
            }
        }
        Ok(out)
    }

    pub fn tally_kinds(&self) -> Vec<ObjectKind> {
        ObjectKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ObjectKind::Tables => self.tables,
                ObjectKind::Indexes => self.indexes,
                ObjectKind::Views => self.views,
            })
            .collect()
    }

    pub fn any_tally(&self) -> bool {
        self.tables || self.indexes || self.views
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.rows {
            names.push("rows");
        }
        names.extend(self.tally_kinds().into_iter().map(ObjectKind::as_str));
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Concurrency {
    pub databases: usize,
    pub tables: usize,
}

impl Concurrency {
    /// Limits below one fall back to the defaults.
    pub fn new(databases: i64, tables: i64) -> Self {
        Self {
            databases: if databases < 1 {
                DEFAULT_DB_CONCURRENCY
            } else {
                databases as usize
            },
            tables: if tables < 1 {
                DEFAULT_TABLE_CONCURRENCY
            } else {
                tables as usize
            },
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            databases: DEFAULT_DB_CONCURRENCY,
            tables: DEFAULT_TABLE_CONCURRENCY,
        }
    }
}

/// Created once per invocation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ComparisonJob {
    pub source: SideSpec,
    pub destination: SideSpec,
    pub selection: Selection,
    pub ignore: IgnoreList,
    pub threshold: u64,
    pub compare: CompareItems,
    pub count_method: CountMethod,
    pub concurrency: Concurrency,
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
    pub pool: PoolOptions,
    pub close_timeout: Duration,
}

impl ComparisonJob {
    pub fn new(source: SideSpec, destination: SideSpec, selection: Selection) -> Self {
        let concurrency = Concurrency::default();
        Self {
            source,
            destination,
            selection,
            ignore: IgnoreList::default(),
            threshold: 0,
            compare: CompareItems::default(),
            count_method: CountMethod::default(),
            concurrency,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            retry: RetryPolicy::default(),
            pool: PoolOptions::derive(concurrency.databases, concurrency.tables),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn side(&self, side: Side) -> &SideSpec {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }
}
