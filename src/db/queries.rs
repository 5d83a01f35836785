pub mod mysql {
    pub const DATABASES: &str = "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME LIKE ? ORDER BY SCHEMA_NAME";

    pub const BASE_TABLES: &str = r#"
SELECT TABLE_NAME
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
ORDER BY TABLE_NAME
"#;

    pub const TABLE_STATISTICS: &str = r#"
SELECT TABLE_ROWS
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'
"#;

    pub const TALLY_TABLES: &str = r#"
SELECT TABLE_SCHEMA, COUNT(*) AS total
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_TYPE = 'BASE TABLE'
GROUP BY TABLE_SCHEMA
"#;

    /// TiDB-only view; plain MySQL rejects it.
    pub const TALLY_INDEXES: &str = r#"
SELECT TABLE_SCHEMA, COUNT(*) AS total
FROM INFORMATION_SCHEMA.TIDB_INDEXES
GROUP BY TABLE_SCHEMA
"#;

    pub const TALLY_VIEWS: &str = r#"
SELECT TABLE_SCHEMA, COUNT(*) AS total
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_TYPE = 'VIEW'
GROUP BY TABLE_SCHEMA
"#;

    pub fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    pub fn exact_count(database: &str, table: &str) -> String {
        format!(
            "SELECT COUNT(1) FROM {}.{}",
            quote_ident(database),
            quote_ident(table)
        )
    }

    pub fn pin_snapshot(marker: u64) -> String {
        format!("SET @@tidb_snapshot = {}", marker)
    }
}

pub mod mssql {
    pub const DATABASES: &str =
        "SELECT name FROM sys.databases WHERE name LIKE @P1 ORDER BY name";

    pub const USER_DATABASES: &str =
        "SELECT name FROM sys.databases WHERE database_id > 4 AND state_desc = 'ONLINE' ORDER BY name";

    pub fn quote_ident(name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    /// Splits `schema.table`; unqualified names live in `dbo`.
    pub fn split_table(table: &str) -> (&str, &str) {
        table.split_once('.').unwrap_or(("dbo", table))
    }

    pub fn base_tables(database: &str) -> String {
        format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME FROM {}.INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_SCHEMA, TABLE_NAME",
            quote_ident(database)
        )
    }

    pub fn exact_count(database: &str, table: &str) -> String {
        let (schema, name) = split_table(table);
        format!(
            "SELECT COUNT_BIG(*) FROM {}.{}.{}",
            quote_ident(database),
            quote_ident(schema),
            quote_ident(name)
        )
    }

    pub fn table_statistics(database: &str) -> String {
        let db = quote_ident(database);
        format!(
            "SELECT CAST(COALESCE(SUM(p.rows), 0) AS BIGINT) \
             FROM {db}.sys.partitions p \
             JOIN {db}.sys.tables t ON t.object_id = p.object_id \
             JOIN {db}.sys.schemas s ON s.schema_id = t.schema_id \
             WHERE p.index_id IN (0, 1) AND s.name = @P1 AND t.name = @P2"
        )
    }

    pub fn tally_tables(database: &str) -> String {
        format!(
            "SELECT COUNT_BIG(*) FROM {}.INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'",
            quote_ident(database)
        )
    }

    pub fn tally_indexes(database: &str) -> String {
        let db = quote_ident(database);
        format!(
            "SELECT COUNT_BIG(*) FROM {db}.sys.indexes i \
             JOIN {db}.sys.tables t ON t.object_id = i.object_id \
             WHERE i.index_id > 0 AND i.is_hypothetical = 0"
        )
    }

    pub fn tally_views(database: &str) -> String {
        format!(
            "SELECT COUNT_BIG(*) FROM {}.INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'VIEW'",
            quote_ident(database)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_per_backend() {
        assert_eq!(mysql::quote_ident("we`ird"), "`we``ird`");
        assert_eq!(mssql::quote_ident("we]ird"), "[we]]ird]");
    }

    #[test]
    fn builds_count_queries() {
        assert_eq!(
            mysql::exact_count("db1", "t1"),
            "SELECT COUNT(1) FROM `db1`.`t1`"
        );
        assert_eq!(
            mssql::exact_count("sales", "crm.orders"),
            "SELECT COUNT_BIG(*) FROM [sales].[crm].[orders]"
        );
        assert_eq!(
            mssql::exact_count("sales", "orders"),
            "SELECT COUNT_BIG(*) FROM [sales].[dbo].[orders]"
        );
    }

    #[test]
    fn snapshot_statement_is_numeric() {
        assert_eq!(mysql::pin_snapshot(449), "SET @@tidb_snapshot = 449");
    }
}
