use anyhow::Result;

use crate::db::client::MssqlClient;
use crate::db::types::{Column, ResultSet, Value};
use crate::error::{AppError, ErrorKind};

pub async fn run_query(
    query: tiberius::Query<'_>,
    client: &mut MssqlClient,
    kind: ErrorKind,
) -> Result<ResultSet> {
    let stream = query
        .query(client)
        .await
        .map_err(|err| AppError::new(kind, err.to_string()))?;
    let rows = stream
        .into_first_result()
        .await
        .map_err(|err| AppError::new(kind, err.to_string()))?;

    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|col| Column {
                    name: col.name().to_string(),
                    data_type: None,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let converted_rows = rows
        .iter()
        .map(|row| row.cells().map(|(_, data)| map_column_data(data)).collect())
        .collect();

    Ok(ResultSet {
        columns,
        rows: converted_rows,
    })
}

/// First cell of the first row as an integer, for scalar `COUNT` queries.
pub fn first_int(result_set: &ResultSet) -> Option<i64> {
    result_set
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_int)
}

/// Every row's cells joined with `.`, for name listings such as `schema.table`.
pub fn joined_names(result_set: &ResultSet) -> Vec<String> {
    result_set
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(Value::as_csv)
                .collect::<Vec<_>>()
                .join(".")
        })
        .collect()
}

fn map_column_data(data: &tiberius::ColumnData<'_>) -> Value {
    use tiberius::ColumnData::*;
    match data {
        U8(value) => value.map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        I16(value) => value.map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        I32(value) => value.map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        I64(value) => value.map(Value::Int).unwrap_or(Value::Null),
        F32(value) => value.map(|v| Value::Float(v as f64)).unwrap_or(Value::Null),
        F64(value) => value.map(Value::Float).unwrap_or(Value::Null),
        Bit(value) => value.map(Value::Bool).unwrap_or(Value::Null),
        String(value) => value
            .as_ref()
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null),
        Numeric(value) => value
            .as_ref()
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null),
        // Metadata and count queries never select temporal, binary or XML columns.
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_set(rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet {
            columns: Vec::new(),
            rows,
        }
    }

    #[test]
    fn reads_scalar_counts() {
        let rs = result_set(vec![vec![Value::Int(42)]]);
        assert_eq!(first_int(&rs), Some(42));
        assert_eq!(first_int(&result_set(Vec::new())), None);
    }

    #[test]
    fn joins_schema_and_table_names() {
        let rs = result_set(vec![vec![
            Value::Text("crm".to_string()),
            Value::Text("orders".to_string()),
        ]]);
        assert_eq!(joined_names(&rs), vec!["crm.orders".to_string()]);
    }

    #[test]
    fn maps_integer_cells() {
        let value = map_column_data(&tiberius::ColumnData::I64(Some(7)));
        assert_eq!(value, Value::Int(7));
        let value = map_column_data(&tiberius::ColumnData::I32(None));
        assert_eq!(value, Value::Null);
    }
}
