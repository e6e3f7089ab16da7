// ABOUTME: MySQL-backed change log and source row store
// ABOUTME: Builds every log query from the configured table and column names

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Row, Value};
use tokio::sync::Mutex;

use super::{from_mysql_value, to_mysql_value};
use crate::config::{ColumnLayout, LogColumns};
use crate::sync::{
    Action, ChangeLogEntry, ChangeLogStore, ColumnValue, CompositeKey, EntryStatus, ForwardStatus,
    LogSummary, MessageUpdate, RowData, SourceStore, StatusTransition,
};
use crate::utils::{quote_mysql_ident, quote_mysql_table};

/// SQL text for every change log and source query, with identifiers quoted.
#[derive(Debug, Clone)]
pub struct LogQueries {
    log_table: String,
    source_table: String,
    id: String,
    partition: String,
    action: String,
    status: String,
    attempt: String,
    message: String,
    logged_at: String,
    forward_status: String,
    processed_by: String,
}

impl LogQueries {
    pub fn new(
        log_table: &str,
        source_table: &str,
        columns: &ColumnLayout,
        log_columns: &LogColumns,
    ) -> Self {
        Self {
            log_table: quote_mysql_table(log_table),
            source_table: quote_mysql_table(source_table),
            id: quote_mysql_ident(&columns.id),
            partition: quote_mysql_ident(&columns.partition),
            action: quote_mysql_ident(&log_columns.action),
            status: quote_mysql_ident(&log_columns.status),
            attempt: quote_mysql_ident(&log_columns.attempt),
            message: quote_mysql_ident(&log_columns.message),
            logged_at: quote_mysql_ident(&log_columns.logged_at),
            forward_status: quote_mysql_ident(&log_columns.forward_status),
            processed_by: quote_mysql_ident(&log_columns.processed_by),
        }
    }

    /// Column list read by [`parse_entry`], in its expected order.
    fn entry_columns(&self) -> String {
        format!(
            "{}, {}, {}, {}, COALESCE({}, 0), {}, {}, {}, {}",
            self.id,
            self.partition,
            self.action,
            self.status,
            self.attempt,
            self.message,
            self.logged_at,
            self.forward_status,
            self.processed_by
        )
    }

    /// Normalized action as stored: trimmed, upper-cased, missing = UPDATE.
    fn action_expr(&self) -> String {
        format!(
            "COALESCE(NULLIF(UPPER(TRIM({})), ''), 'UPDATE')",
            self.action
        )
    }

    fn key_predicate(&self) -> String {
        format!("{} = ? AND {} = ?", self.id, self.partition)
    }

    pub fn fetch_pending(&self, limit: Option<usize>) -> String {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = 'PENDING' ORDER BY {} ASC",
            self.entry_columns(),
            self.log_table,
            self.status,
            self.logged_at
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    pub fn latest_attempt(&self) -> String {
        format!(
            "SELECT COALESCE(MAX({}), 0) FROM {} WHERE {}",
            self.attempt,
            self.log_table,
            self.key_predicate()
        )
    }

    /// Compare-and-swap status write.
    ///
    /// Parameters: status, next attempt, message, processed_by, id,
    /// partition, logged_until, one per eligible action, expected attempt.
    pub fn transition(&self, eligible_actions: usize, append: bool) -> String {
        let message = if append {
            format!("CONCAT(COALESCE({}, ''), ?)", self.message)
        } else {
            "?".to_string()
        };
        let placeholders = vec!["?"; eligible_actions.max(1)].join(", ");
        format!(
            "UPDATE {} SET {} = ?, {} = ?, {} = {}, {} = ? WHERE {} AND {} = 'PENDING' AND {} <= ? AND {} IN ({}) AND COALESCE({}, 0) = ?",
            self.log_table,
            self.status,
            self.attempt,
            self.message,
            message,
            self.processed_by,
            self.key_predicate(),
            self.status,
            self.logged_at,
            self.action_expr(),
            placeholders,
            self.attempt
        )
    }

    /// Picks out one log row: key, log time, action and attempt as read.
    ///
    /// Parameters: id, partition, logged_at, action, attempt.
    fn entry_predicate(&self) -> String {
        format!(
            "{} AND {} = ? AND {} = ? AND COALESCE({}, 0) = ?",
            self.key_predicate(),
            self.logged_at,
            self.action_expr(),
            self.attempt
        )
    }

    /// Parameters: suffix, processed_by, then [`Self::entry_predicate`]'s.
    pub fn annotate(&self) -> String {
        format!(
            "UPDATE {} SET {} = CONCAT(COALESCE({}, ''), ?), {} = ? WHERE {} AND {} = 'PENDING'",
            self.log_table,
            self.message,
            self.message,
            self.processed_by,
            self.entry_predicate(),
            self.status
        )
    }

    pub fn fetch_unforwarded(&self, limit: usize) -> String {
        format!(
            "SELECT {} FROM {} WHERE ({} IS NULL OR {} <> 'SENT') ORDER BY {} ASC LIMIT {}",
            self.entry_columns(),
            self.log_table,
            self.forward_status,
            self.forward_status,
            self.logged_at,
            limit
        )
    }

    /// Parameters: [`Self::entry_predicate`]'s.
    pub fn mark_forwarded(&self) -> String {
        format!(
            "UPDATE {} SET {} = 'SENT' WHERE {}",
            self.log_table,
            self.forward_status,
            self.entry_predicate()
        )
    }

    /// Parameters: suffix, then [`Self::entry_predicate`]'s.
    pub fn mark_forward_failed(&self) -> String {
        format!(
            "UPDATE {} SET {} = 'PENDING', {} = CONCAT(COALESCE({}, ''), ?) WHERE {}",
            self.log_table,
            self.forward_status,
            self.message,
            self.message,
            self.entry_predicate()
        )
    }

    pub fn count_by_status(&self) -> String {
        format!(
            "SELECT COALESCE({}, 'NULL'), COUNT(*) FROM {} GROUP BY {} ORDER BY {}",
            self.status, self.log_table, self.status, self.status
        )
    }

    pub fn count_unforwarded(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL OR {} <> 'SENT'",
            self.log_table, self.forward_status, self.forward_status
        )
    }

    pub fn fetch_source_row(&self) -> String {
        format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            self.source_table,
            self.key_predicate()
        )
    }
}

/// One MySQL connection serving both the change log and the source table.
pub struct MySqlStore {
    conn: Mutex<Option<Conn>>,
    queries: LogQueries,
}

impl MySqlStore {
    pub fn new(conn: Conn, queries: LogQueries) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            queries,
        }
    }

    /// Disconnect. Later calls on this store fail.
    pub async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .context("Failed to disconnect from MySQL")?;
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: Params) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow!("MySQL connection is closed"))?;
        let rows: Vec<Row> = conn.exec(sql, params).await?;
        Ok(rows)
    }

    async fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow!("MySQL connection is closed"))?;
        conn.exec_drop(sql, params).await?;
        Ok(conn.affected_rows())
    }

    async fn fetch_entries(&self, sql: &str) -> Result<Vec<ChangeLogEntry>> {
        self.query(sql, Params::Empty)
            .await?
            .iter()
            .map(parse_entry)
            .collect()
    }
}

fn text_param(s: &str) -> Value {
    Value::Bytes(s.as_bytes().to_vec())
}

fn key_params(key: &CompositeKey) -> Vec<Value> {
    vec![to_mysql_value(&key.id), to_mysql_value(&key.partition)]
}

fn entry_params(entry: &ChangeLogEntry) -> Vec<Value> {
    let mut params = key_params(&entry.key);
    params.push(to_mysql_value(&ColumnValue::Timestamp(entry.logged_at)));
    params.push(text_param(entry.action.as_str()));
    params.push(Value::Int(entry.attempt));
    params
}

fn column(row: &Row, index: usize) -> Result<ColumnValue> {
    let value = row
        .as_ref(index)
        .ok_or_else(|| anyhow!("Missing column {} in change log row", index))?;
    let column_type = row.columns_ref()[index].column_type();
    Ok(from_mysql_value(value, column_type))
}

fn text(value: ColumnValue) -> Option<String> {
    match value {
        ColumnValue::Null => None,
        other => Some(other.canonical()),
    }
}

/// Parse a row selected with [`LogQueries::entry_columns`].
fn parse_entry(row: &Row) -> Result<ChangeLogEntry> {
    let key = CompositeKey::new(column(row, 0)?, column(row, 1)?);
    let action = Action::parse(text(column(row, 2)?).as_deref());
    // Rows written before the status column had a default carry NULL
    let status = match text(column(row, 3)?) {
        None => EntryStatus::Pending,
        Some(s) => s
            .parse::<EntryStatus>()
            .with_context(|| format!("Invalid status in change log entry {}", key))?,
    };
    let attempt = match column(row, 4)? {
        ColumnValue::Int(i) => i,
        ColumnValue::Null => 0,
        other => other
            .canonical()
            .parse::<i64>()
            .with_context(|| format!("Invalid attempt counter in change log entry {}", key))?,
    };
    let message = text(column(row, 5)?);
    let logged_at = match column(row, 6)? {
        ColumnValue::Timestamp(ts) => ts,
        other => bail!("Invalid log time '{}' in change log entry {}", other, key),
    };
    let forward_status = ForwardStatus::parse(text(column(row, 7)?).as_deref());
    let processed_by = text(column(row, 8)?);

    Ok(ChangeLogEntry {
        key,
        action,
        status,
        attempt,
        message,
        logged_at,
        forward_status,
        processed_by,
    })
}

#[async_trait]
impl ChangeLogStore for MySqlStore {
    async fn fetch_pending(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>> {
        self.fetch_entries(&self.queries.fetch_pending(limit)).await
    }

    async fn latest_attempt(&self, key: &CompositeKey) -> Result<i64> {
        let rows = self
            .query(
                &self.queries.latest_attempt(),
                Params::Positional(key_params(key)),
            )
            .await?;
        match rows.first() {
            Some(row) => match column(row, 0)? {
                ColumnValue::Int(i) => Ok(i),
                ColumnValue::Null => Ok(0),
                other => other
                    .canonical()
                    .parse::<i64>()
                    .with_context(|| format!("Invalid attempt counter for {}", key)),
            },
            None => Ok(0),
        }
    }

    async fn transition(&self, transition: &StatusTransition) -> Result<u64> {
        let (message, append) = match &transition.message {
            MessageUpdate::Replace(m) => (m, false),
            MessageUpdate::Append(m) => (m, true),
        };
        let mut params = vec![
            text_param(transition.status.as_str()),
            Value::Int(transition.next_attempt),
            text_param(message),
            text_param(&transition.processed_by),
        ];
        params.extend(key_params(&transition.key));
        params.push(to_mysql_value(&ColumnValue::Timestamp(transition.logged_until)));
        params.extend(
            transition
                .eligible_actions
                .iter()
                .map(|a| text_param(a.as_str())),
        );
        params.push(Value::Int(transition.expected_attempt));

        let sql = self
            .queries
            .transition(transition.eligible_actions.len(), append);
        self.execute(&sql, Params::Positional(params)).await
    }

    async fn annotate(
        &self,
        entry: &ChangeLogEntry,
        suffix: &str,
        processed_by: &str,
    ) -> Result<()> {
        let mut params = vec![text_param(suffix), text_param(processed_by)];
        params.extend(entry_params(entry));
        self.execute(&self.queries.annotate(), Params::Positional(params))
            .await?;
        Ok(())
    }

    async fn fetch_unforwarded(&self, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        self.fetch_entries(&self.queries.fetch_unforwarded(limit))
            .await
    }

    async fn mark_forwarded(&self, entry: &ChangeLogEntry) -> Result<()> {
        self.execute(
            &self.queries.mark_forwarded(),
            Params::Positional(entry_params(entry)),
        )
        .await?;
        Ok(())
    }

    async fn mark_forward_failed(&self, entry: &ChangeLogEntry, suffix: &str) -> Result<()> {
        let mut params = vec![text_param(suffix)];
        params.extend(entry_params(entry));
        self.execute(
            &self.queries.mark_forward_failed(),
            Params::Positional(params),
        )
        .await?;
        Ok(())
    }

    async fn summary(&self) -> Result<LogSummary> {
        let mut by_status = Vec::new();
        for row in self
            .query(&self.queries.count_by_status(), Params::Empty)
            .await?
        {
            let status = text(column(&row, 0)?).unwrap_or_default();
            let count = column(&row, 1)?.canonical().parse::<i64>().unwrap_or(0);
            by_status.push((status, count));
        }

        let unforwarded = match self
            .query(&self.queries.count_unforwarded(), Params::Empty)
            .await?
            .first()
        {
            Some(row) => column(row, 0)?.canonical().parse::<i64>().unwrap_or(0),
            None => 0,
        };

        Ok(LogSummary {
            by_status,
            unforwarded,
        })
    }
}

#[async_trait]
impl SourceStore for MySqlStore {
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>> {
        let rows = self
            .query(
                &self.queries.fetch_source_row(),
                Params::Positional(key_params(key)),
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let mut data = RowData::new();
        for (index, col) in row.columns_ref().iter().enumerate() {
            let value = row
                .as_ref(index)
                .map(|v| from_mysql_value(v, col.column_type()))
                .unwrap_or(ColumnValue::Null);
            data.set(&col.name_str(), value);
        }
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries() -> LogQueries {
        LogQueries::new(
            "data_timbang_log",
            "data_timbang",
            &ColumnLayout::default(),
            &LogColumns::default(),
        )
    }

    #[test]
    fn test_fetch_pending_query() {
        let sql = queries().fetch_pending(Some(50));
        assert!(sql.starts_with("SELECT `nourut1`, `plant_id`, `aksi`"));
        assert!(sql.contains("FROM `data_timbang_log`"));
        assert!(sql.contains("WHERE `status` = 'PENDING'"));
        assert!(sql.contains("ORDER BY `log_time` ASC"));
        assert!(sql.ends_with("LIMIT 50"));

        assert!(!queries().fetch_pending(None).contains("LIMIT"));
    }

    #[test]
    fn test_transition_query_is_compare_and_swap() {
        let sql = queries().transition(2, false);
        assert!(sql.starts_with("UPDATE `data_timbang_log` SET `status` = ?, `counter_done` = ?"));
        assert!(sql.contains("`message` = ?,"));
        assert!(sql.contains("COALESCE(NULLIF(UPPER(TRIM(`aksi`)), ''), 'UPDATE') IN (?, ?)"));
        assert!(sql.ends_with("AND COALESCE(`counter_done`, 0) = ?"));
        assert_eq!(sql.matches('?').count(), 10);
    }

    #[test]
    fn test_transition_never_claims_later_or_settled_entries() {
        let sql = queries().transition(1, false);
        assert!(sql.contains(
            "WHERE `nourut1` = ? AND `plant_id` = ? AND `status` = 'PENDING' AND `log_time` <= ? AND"
        ));
    }

    #[test]
    fn test_transition_query_appends_message() {
        let sql = queries().transition(1, true);
        assert!(sql.contains("`message` = CONCAT(COALESCE(`message`, ''), ?)"));
        assert!(sql.contains("IN (?)"));
    }

    #[test]
    fn test_forward_queries() {
        let q = queries();
        let sql = q.fetch_unforwarded(100);
        assert!(sql.contains("(`sync_status` IS NULL OR `sync_status` <> 'SENT')"));
        assert!(sql.ends_with("ORDER BY `log_time` ASC LIMIT 100"));

        let sql = q.mark_forwarded();
        assert!(sql.contains("SET `sync_status` = 'SENT'"));
        assert!(sql.ends_with(
            "`nourut1` = ? AND `plant_id` = ? AND `log_time` = ? \
             AND COALESCE(NULLIF(UPPER(TRIM(`aksi`)), ''), 'UPDATE') = ? \
             AND COALESCE(`counter_done`, 0) = ?"
        ));
        assert_eq!(sql.matches('?').count(), 5);

        let sql = q.mark_forward_failed();
        assert!(sql.contains("`sync_status` = 'PENDING'"));
        assert!(sql.contains("CONCAT(COALESCE(`message`, ''), ?)"));
        assert_eq!(sql.matches('?').count(), 6);
    }

    #[test]
    fn test_annotate_only_touches_pending_entry() {
        let sql = queries().annotate();
        assert!(sql.contains("AND `log_time` = ?"));
        assert!(sql.contains("AND COALESCE(`counter_done`, 0) = ?"));
        assert!(sql.ends_with("AND `status` = 'PENDING'"));
        assert_eq!(sql.matches('?').count(), 7);
    }

    #[test]
    fn test_source_and_attempt_queries() {
        let q = queries();
        assert_eq!(
            q.fetch_source_row(),
            "SELECT * FROM `data_timbang` WHERE `nourut1` = ? AND `plant_id` = ? LIMIT 1"
        );
        assert_eq!(
            q.latest_attempt(),
            "SELECT COALESCE(MAX(`counter_done`), 0) FROM `data_timbang_log` WHERE `nourut1` = ? AND `plant_id` = ?"
        );
    }
}
