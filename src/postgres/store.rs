// ABOUTME: PostgreSQL-backed destination table and central log store
// ABOUTME: Converts typed PostgreSQL columns into store-neutral values for diffing

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use super::connection::PgConnection;
use crate::config::{ColumnLayout, LogColumns};
use crate::sync::{
    CentralLogStore, ChangeLogEntry, ColumnValue, CompositeKey, DestinationStore, RowData,
};
use crate::utils::{quote_ident, quote_pg_table};

/// Quote a column for the destination, folding it to lowercase.
fn pg_column(name: &str) -> String {
    quote_ident(&name.to_lowercase())
}

/// SQL builders for the destination and central log tables.
#[derive(Debug, Clone)]
pub struct DestinationQueries {
    table: String,
    central_log_table: String,
    id: String,
    partition: String,
    log_columns: Vec<String>,
}

impl DestinationQueries {
    pub fn new(
        table: &str,
        central_log_table: &str,
        columns: &ColumnLayout,
        log_columns: &LogColumns,
    ) -> Self {
        Self {
            table: quote_pg_table(table),
            central_log_table: quote_pg_table(central_log_table),
            id: pg_column(&columns.id),
            partition: pg_column(&columns.partition),
            log_columns: [
                &columns.id,
                &columns.partition,
                &log_columns.action,
                &log_columns.attempt,
                &log_columns.processed_by,
                &log_columns.status,
                &log_columns.message,
                &log_columns.logged_at,
            ]
            .iter()
            .map(|c| pg_column(c))
            .collect(),
        }
    }

    pub fn select_row(&self) -> String {
        format!(
            "SELECT * FROM {} WHERE {} = $1 AND {} = $2 LIMIT 1",
            self.table, self.id, self.partition
        )
    }

    pub fn insert_row<'a>(&self, columns: impl Iterator<Item = &'a str>) -> String {
        let names: Vec<String> = columns.map(pg_column).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    /// `SET` list first, then the two key parameters.
    pub fn update_row<'a>(&self, columns: impl Iterator<Item = &'a str>) -> String {
        let assignments: Vec<String> = columns
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", pg_column(c), i + 1))
            .collect();
        let n = assignments.len();
        format!(
            "UPDATE {} SET {} WHERE {} = ${} AND {} = ${}",
            self.table,
            assignments.join(", "),
            self.id,
            n + 1,
            self.partition,
            n + 2
        )
    }

    pub fn insert_central_entry(&self) -> String {
        let placeholders: Vec<String> = (1..=self.log_columns.len())
            .map(|i| format!("${}", i))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.central_log_table,
            self.log_columns.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Read one column of a PostgreSQL row into a [`ColumnValue`].
///
/// Types without a direct mapping are read as text when the server can
/// send them that way, otherwise replaced by a `<type>` placeholder.
pub fn column_value(row: &Row, index: usize) -> ColumnValue {
    let ty = row.columns()[index].type_().clone();
    let value = match ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .map(|v| v.map(ColumnValue::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map(|v| v.map(|i| ColumnValue::Int(i64::from(i)))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map(|v| v.map(|i| ColumnValue::Int(i64::from(i)))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .map(|v| v.map(ColumnValue::Int)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map(|v| v.map(|f| ColumnValue::Float(f64::from(f)))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)
            .map(|v| v.map(ColumnValue::Float)),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)
            .map(|v| v.map(ColumnValue::Decimal)),
        // CHAR(n) is blank-padded; MySQL strips the padding on read
        Type::BPCHAR => row
            .try_get::<_, Option<String>>(index)
            .map(|v| v.map(|s| ColumnValue::Text(s.trim_end().to_string()))),
        Type::TEXT | Type::VARCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(index)
            .map(|v| v.map(ColumnValue::Text)),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| v.map(|j| ColumnValue::Text(j.to_string()))),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .map(|v| v.map(|u| ColumnValue::Text(u.to_string()))),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)
            .map(|v| v.map(ColumnValue::Bytes)),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map(|v| v.map(ColumnValue::Date)),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)
            .map(|v| v.map(ColumnValue::Time)),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| v.map(ColumnValue::Timestamp)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| v.map(|ts| ColumnValue::Timestamp(ts.naive_utc()))),
        _ => row
            .try_get::<_, Option<String>>(index)
            .map(|v| v.map(ColumnValue::Text)),
    };

    match value {
        Ok(Some(v)) => v,
        Ok(None) => ColumnValue::Null,
        Err(_) => ColumnValue::Text(format!("<{}>", ty.name())),
    }
}

/// One PostgreSQL connection serving the destination table and central log.
pub struct PgStore {
    connection: PgConnection,
    queries: DestinationQueries,
}

impl PgStore {
    pub fn new(connection: PgConnection, queries: DestinationQueries) -> Self {
        Self {
            connection,
            queries,
        }
    }

    pub async fn close(self) {
        self.connection.close().await;
    }
}

fn params<'a>(values: &[&'a ColumnValue]) -> Vec<&'a (dyn ToSql + Sync)> {
    values.iter().map(|v| *v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl DestinationStore for PgStore {
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>> {
        let row = self
            .connection
            .client
            .query_opt(&self.queries.select_row(), &params(&[&key.id, &key.partition]))
            .await
            .context("Failed to query destination row")?;

        Ok(row.map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| (col.name().to_string(), column_value(&row, i)))
                .collect()
        }))
    }

    async fn insert_row(&self, row: &RowData) -> Result<()> {
        let sql = self.queries.insert_row(row.column_names());
        let values: Vec<&ColumnValue> = row.iter().map(|(_, v)| v).collect();
        self.connection
            .client
            .execute(&sql, &params(&values))
            .await
            .context("Failed to insert destination row")?;
        Ok(())
    }

    async fn update_row(&self, key: &CompositeKey, values: &RowData) -> Result<u64> {
        let sql = self.queries.update_row(values.column_names());
        let mut bound: Vec<&ColumnValue> = values.iter().map(|(_, v)| v).collect();
        bound.push(&key.id);
        bound.push(&key.partition);
        self.connection
            .client
            .execute(&sql, &params(&bound))
            .await
            .context("Failed to update destination row")
    }
}

#[async_trait]
impl CentralLogStore for PgStore {
    async fn insert_entry(&self, entry: &ChangeLogEntry) -> Result<()> {
        let action = ColumnValue::from(entry.action.as_str());
        let attempt = ColumnValue::Int(entry.attempt);
        let processed_by = ColumnValue::from(entry.processed_by.clone());
        let status = ColumnValue::from(entry.status.as_str());
        let message = ColumnValue::from(entry.message.clone());
        let logged_at = ColumnValue::Timestamp(entry.logged_at);

        self.connection
            .client
            .execute(
                &self.queries.insert_central_entry(),
                &params(&[
                    &entry.key.id,
                    &entry.key.partition,
                    &action,
                    &attempt,
                    &processed_by,
                    &status,
                    &message,
                    &logged_at,
                ]),
            )
            .await
            .context("Failed to insert central log entry")?;
        Ok(())
    }
}
