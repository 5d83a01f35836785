//! SQL Server backend on top of `tiberius`.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tiberius::Query;

use crate::db::client::{self, MssqlClient};
use crate::db::executor::{first_int, joined_names, run_query};
use crate::db::instance::InstanceDescriptor;
use crate::db::queries::mssql as sql;
use crate::db::session::{Connector, CountMethod, ObjectKind, Session, SnapshotMarker};
use crate::error::{AppError, ErrorKind};

#[derive(Debug, Clone)]
pub struct MssqlConnector {
    descriptor: InstanceDescriptor,
}

impl MssqlConnector {
    pub fn new(descriptor: InstanceDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    type Session = MssqlSession;

    async fn connect(&self) -> Result<MssqlSession> {
        let client = client::connect(&self.descriptor).await?;
        Ok(MssqlSession { client })
    }

    fn describe(&self) -> String {
        self.descriptor.redacted()
    }
}

pub struct MssqlSession {
    client: MssqlClient,
}

#[async_trait]
impl Session for MssqlSession {
    async fn pin_snapshot(&mut self, marker: SnapshotMarker) -> Result<()> {
        Err(AppError::new(
            ErrorKind::SnapshotPin,
            format!(
                "Snapshot {} requested, but SQL Server instances cannot be pinned to a snapshot marker",
                marker
            ),
        )
        .into())
    }

    async fn list_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut query = Query::new(sql::DATABASES);
        query.bind(pattern.to_string());
        let result = run_query(query, &mut self.client, ErrorKind::SchemaEnumeration).await?;
        Ok(joined_names(&result))
    }

    async fn list_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let query = Query::new(sql::base_tables(database));
        let result = run_query(query, &mut self.client, ErrorKind::SchemaEnumeration).await?;
        Ok(joined_names(&result))
    }

    async fn count_rows(
        &mut self,
        database: &str,
        table: &str,
        method: CountMethod,
    ) -> Result<i64> {
        let query = match method {
            CountMethod::Exact => Query::new(sql::exact_count(database, table)),
            CountMethod::Statistics => {
                let (schema, name) = sql::split_table(table);
                let mut query = Query::new(sql::table_statistics(database));
                query.bind(schema.to_string());
                query.bind(name.to_string());
                query
            }
        };
        let result = run_query(query, &mut self.client, ErrorKind::Query).await?;
        Ok(first_int(&result).unwrap_or(0))
    }

    async fn object_tally(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, i64>> {
        let databases = run_query(
            Query::new(sql::USER_DATABASES),
            &mut self.client,
            ErrorKind::Query,
        )
        .await?;

        let mut tally = BTreeMap::new();
        for database in joined_names(&databases) {
            let text = match kind {
                ObjectKind::Tables => sql::tally_tables(&database),
                ObjectKind::Indexes => sql::tally_indexes(&database),
                ObjectKind::Views => sql::tally_views(&database),
            };
            let result = run_query(Query::new(text), &mut self.client, ErrorKind::Query).await?;
            tally.insert(database, first_int(&result).unwrap_or(0));
        }
        Ok(tally)
    }

    async fn close(self) -> Result<()> {
        self.client
            .close()
            .await
            .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?;
        Ok(())
    }
}
