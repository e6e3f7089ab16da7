// ABOUTME: Change log reader - pending and not-yet-forwarded entries in arrival order
// ABOUTME: Read-only; an empty log is a normal result

use anyhow::{Context, Result};

use super::entry::{ChangeLogEntry, EntryStatus};
use super::store::ChangeLogStore;

pub struct ChangeLogReader<'a> {
    log: &'a dyn ChangeLogStore,
}

impl<'a> ChangeLogReader<'a> {
    pub fn new(log: &'a dyn ChangeLogStore) -> Self {
        Self { log }
    }

    /// PENDING entries, oldest first, at most `limit` of them.
    ///
    /// The store is asked for arrival order; the result is stably re-sorted
    /// so that entries for one key are always processed in the order they
    /// were logged, and anything not PENDING is dropped.
    pub async fn pending(&self, limit: Option<usize>) -> Result<Vec<ChangeLogEntry>> {
        let mut entries = self
            .log
            .fetch_pending(limit)
            .await
            .context("Failed to read pending change log entries")?;
        entries.retain(|e| e.status == EntryStatus::Pending);
        entries.sort_by_key(|e| e.logged_at);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        tracing::debug!("Read {} pending change log entries", entries.len());
        Ok(entries)
    }

    /// Entries not yet marked SENT, oldest first, at most `limit` of them.
    pub async fn unforwarded(&self, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        let mut entries = self
            .log
            .fetch_unforwarded(limit)
            .await
            .context("Failed to read unforwarded change log entries")?;
        entries.sort_by_key(|e| e.logged_at);
        entries.truncate(limit);
        tracing::debug!("Read {} unforwarded change log entries", entries.len());
        Ok(entries)
    }
}
