// ABOUTME: Store seams for the reconciliation engine - change log, source, destination, central log
// ABOUTME: Live MySQL/PostgreSQL backends and in-memory test doubles implement these traits

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::entry::{Action, ChangeLogEntry, CompositeKey, EntryStatus};
use super::value::RowData;
use crate::error::SyncError;

/// How a status transition treats the entry's existing message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageUpdate {
    /// Overwrite the message.
    Replace(String),
    /// Concatenate onto whatever is already there.
    Append(String),
}

/// A compare-and-swap status write against the change log.
///
/// Applies to PENDING log rows of `key` logged no later than `logged_until`
/// whose action is one of `eligible_actions` and whose attempt counter still
/// equals `expected_attempt`. Entries logged after the one being processed
/// are never claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub key: CompositeKey,
    pub eligible_actions: Vec<Action>,
    pub logged_until: NaiveDateTime,
    pub expected_attempt: i64,
    pub next_attempt: i64,
    pub status: EntryStatus,
    pub message: MessageUpdate,
    pub processed_by: String,
}

impl StatusTransition {
    /// Whether this write claims `entry`, as read before the write ran.
    pub fn covers(&self, entry: &ChangeLogEntry) -> bool {
        entry.key == self.key
            && entry.status == EntryStatus::Pending
            && entry.logged_at <= self.logged_until
            && entry.attempt == self.expected_attempt
            && self.eligible_actions.contains(&entry.action)
    }
}

/// Per-status entry counts plus the forwarding backlog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSummary {
    pub by_status: Vec<(String, i64)>,
    pub unforwarded: i64,
}

#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// PENDING entries, oldest first, at most `limit` if given.
    async fn fetch_pending(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>>;

    /// Highest attempt counter recorded for the key, 0 if none.
    async fn latest_attempt(&self, key: &CompositeKey) -> Result<i64>;

    /// Execute a status transition. Returns the number of log rows it matched;
    /// 0 means another pass already moved the attempt on.
    async fn transition(&self, transition: &StatusTransition) -> Result<u64>;

    /// Append a diagnostic to a still-PENDING entry without changing its status.
    async fn annotate(&self, entry: &ChangeLogEntry, suffix: &str, processed_by: &str)
        -> Result<()>;

    /// Entries not yet copied to the central log, oldest first.
    async fn fetch_unforwarded(&self, limit: usize) -> Result<Vec<ChangeLogEntry>>;

    async fn mark_forwarded(&self, entry: &ChangeLogEntry) -> Result<()>;

    /// Flag a forwarding failure and append its diagnostic suffix.
    async fn mark_forward_failed(&self, entry: &ChangeLogEntry, suffix: &str) -> Result<()>;

    async fn summary(&self) -> Result<LogSummary>;
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Current source row for the key, if it still exists.
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>>;
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn fetch_row(&self, key: &CompositeKey) -> Result<Option<RowData>>;

    /// Insert a complete row.
    async fn insert_row(&self, row: &RowData) -> Result<()>;

    /// Update the given columns of the keyed row. Returns rows affected.
    async fn update_row(&self, key: &CompositeKey, values: &RowData) -> Result<u64>;
}

#[async_trait]
pub trait CentralLogStore: Send + Sync {
    /// Insert a copy of a change log entry (message already cleaned).
    async fn insert_entry(&self, entry: &ChangeLogEntry) -> Result<()>;
}

/// Connections for one pass. Dropped via [`Session::close`] on every exit path.
#[async_trait]
pub trait Session: Send + Sync {
    fn log(&self) -> &dyn ChangeLogStore;
    fn source(&self) -> &dyn SourceStore;
    fn destination(&self) -> &dyn DestinationStore;
    fn central(&self) -> &dyn CentralLogStore;

    /// Release every connection. Failures are logged, not returned.
    async fn close(self: Box<Self>);
}

/// Opens a fresh [`Session`] per pass.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, SyncError>;
}
