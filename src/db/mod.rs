pub mod client;
pub mod connection;
pub mod executor;
pub mod instance;
pub mod mssql;
pub mod mysql;
pub mod pool;
pub mod queries;
pub mod session;
pub mod types;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

pub use instance::{Backend, InstanceDescriptor};
pub use pool::{Lease, Pool, PoolOptions, PoolStats, ShutdownOutcome};
pub use session::{Connector, CountMethod, ObjectKind, Session, SnapshotMarker};

use mssql::{MssqlConnector, MssqlSession};
use mysql::{MysqlConnector, MysqlSession};

/// Connector for whichever backend an instance descriptor names.
#[derive(Debug, Clone)]
pub enum InstanceConnector {
    Mysql(MysqlConnector),
    Mssql(MssqlConnector),
}

impl InstanceConnector {
    pub fn from_descriptor(descriptor: InstanceDescriptor) -> Self {
        match descriptor.backend {
            Backend::Mysql => InstanceConnector::Mysql(MysqlConnector::new(descriptor)),
            Backend::Mssql => InstanceConnector::Mssql(MssqlConnector::new(descriptor)),
        }
    }
}

#[async_trait]
impl Connector for InstanceConnector {
    type Session = InstanceSession;

    async fn connect(&self) -> Result<InstanceSession> {
        match self {
            InstanceConnector::Mysql(inner) => inner.connect().await.map(InstanceSession::Mysql),
            InstanceConnector::Mssql(inner) => inner.connect().await.map(InstanceSession::Mssql),
        }
    }

    fn describe(&self) -> String {
        match self {
            InstanceConnector::Mysql(inner) => inner.describe(),
            InstanceConnector::Mssql(inner) => inner.describe(),
        }
    }
}

pub enum InstanceSession {
    Mysql(MysqlSession),
    Mssql(MssqlSession),
}

#[async_trait]
impl Session for InstanceSession {
    async fn pin_snapshot(&mut self, marker: SnapshotMarker) -> Result<()> {
        match self {
            InstanceSession::Mysql(inner) => inner.pin_snapshot(marker).await,
            InstanceSession::Mssql(inner) => inner.pin_snapshot(marker).await,
        }
    }

    async fn list_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        match self {
            InstanceSession::Mysql(inner) => inner.list_databases(pattern).await,
            InstanceSession::Mssql(inner) => inner.list_databases(pattern).await,
        }
    }

    async fn list_tables(&mut self, database: &str) -> Result<Vec<String>> {
        match self {
            InstanceSession::Mysql(inner) => inner.list_tables(database).await,
            InstanceSession::Mssql(inner) => inner.list_tables(database).await,
        }
    }

    async fn count_rows(
        &mut self,
        database: &str,
        table: &str,
        method: CountMethod,
    ) -> Result<i64> {
        match self {
            InstanceSession::Mysql(inner) => inner.count_rows(database, table, method).await,
            InstanceSession::Mssql(inner) => inner.count_rows(database, table, method).await,
        }
    }

    async fn object_tally(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, i64>> {
        match self {
            InstanceSession::Mysql(inner) => inner.object_tally(kind).await,
            InstanceSession::Mssql(inner) => inner.object_tally(kind).await,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            InstanceSession::Mysql(inner) => inner.close().await,
            InstanceSession::Mssql(inner) => inner.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_backend_from_scheme() {
        let descriptor = InstanceDescriptor::parse("tidb://root@10.0.0.5:4000").expect("parse");
        let connector = InstanceConnector::from_descriptor(descriptor);
        assert!(matches!(connector, InstanceConnector::Mysql(_)));
        assert_eq!(connector.describe(), "mysql://root@10.0.0.5:4000");

        let descriptor = InstanceDescriptor::parse("sqlserver://sa:pw@db").expect("parse");
        let connector = InstanceConnector::from_descriptor(descriptor);
        assert!(matches!(connector, InstanceConnector::Mssql(_)));
    }
}
