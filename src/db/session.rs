//! Driver seam between the differencing engine and concrete database backends.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque cluster-specific token pinning a session's reads to a logical point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SnapshotMarker(pub u64);

impl SnapshotMarker {
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().map(SnapshotMarker)
    }
}

impl fmt::Display for SnapshotMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMethod {
    /// `COUNT(*)` over the whole table.
    #[default]
    Exact,
    /// Row estimate kept by the engine's table statistics.
    Statistics,
}

impl CountMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exact" | "count" => Some(CountMethod::Exact),
            "statistics" | "stats" => Some(CountMethod::Statistics),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CountMethod::Exact => "exact",
            CountMethod::Statistics => "statistics",
        }
    }
}

/// Schema object kinds tallied per schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Tables,
    Indexes,
    Views,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Tables, ObjectKind::Indexes, ObjectKind::Views];

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Tables => "tables",
            ObjectKind::Indexes => "indexes",
            ObjectKind::Views => "views",
        }
    }
}

/// Opens new sessions against one instance.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session>;

    /// Human readable, credential-free label for logs.
    fn describe(&self) -> String;
}

/// One live, stateful connection to a single instance.
///
/// Errors are `AppError`s wrapped in `anyhow::Error` so callers can classify them.
#[async_trait]
pub trait Session: Send + 'static {
    /// Pin every subsequent read on this session to `marker`.
    async fn pin_snapshot(&mut self, marker: SnapshotMarker) -> Result<()>;

    /// Database names matching a `LIKE` pattern, ordered by name.
    async fn list_databases(&mut self, pattern: &str) -> Result<Vec<String>>;

    /// Base tables (never views) of `database`, ordered by name.
    async fn list_tables(&mut self, database: &str) -> Result<Vec<String>>;

    async fn count_rows(&mut self, database: &str, table: &str, method: CountMethod)
    -> Result<i64>;

    /// Per-schema object counts for one kind, across the whole instance.
    async fn object_tally(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, i64>>;

    async fn close(self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_markers() {
        assert_eq!(SnapshotMarker::parse(" 42 "), Some(SnapshotMarker(42)));
        assert_eq!(SnapshotMarker::parse("abc"), None);
        assert_eq!(SnapshotMarker::parse("-1"), None);
    }

    #[test]
    fn parses_count_method_aliases() {
        assert_eq!(CountMethod::parse("Exact"), Some(CountMethod::Exact));
        assert_eq!(CountMethod::parse("stats"), Some(CountMethod::Statistics));
        assert_eq!(CountMethod::parse("sample"), None);
    }
}
