// ABOUTME: Row fetcher and projector - loads the authoritative source row and adds derived columns
// ABOUTME: Derived columns: shift date, sync timestamp, provenance tag, cleared soft-delete flag

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use super::entry::CompositeKey;
use super::shift::derive_shift_date;
use super::store::SourceStore;
use super::value::{ColumnValue, RowData};
use crate::config::ColumnLayout;

/// Turns source rows into the shape written at the destination.
#[derive(Debug, Clone)]
pub struct RowProjector {
    columns: ColumnLayout,
    provenance_tag: String,
}

impl RowProjector {
    pub fn new(columns: ColumnLayout, provenance_tag: impl Into<String>) -> Self {
        Self {
            columns,
            provenance_tag: provenance_tag.into(),
        }
    }

    /// Fetch the current source row for `key` and project it.
    ///
    /// `Ok(None)` means the row no longer exists at the source.
    pub async fn fetch(
        &self,
        source: &dyn SourceStore,
        key: &CompositeKey,
        synced_at: NaiveDateTime,
    ) -> Result<Option<RowData>> {
        let row = source
            .fetch_row(key)
            .await
            .with_context(|| format!("Failed to read source row {}", key))?;
        Ok(row.map(|row| self.project(row, synced_at)))
    }

    /// Add the derived columns to a source row.
    ///
    /// A row being written by INSERT/UPDATE exists at the source, so its
    /// destination copy is never soft-deleted.
    pub fn project(&self, mut row: RowData, synced_at: NaiveDateTime) -> RowData {
        let shift = derive_shift_date(row.get(&self.columns.event_time));
        row.set(&self.columns.shift_date, shift);
        row.set(&self.columns.sync_time, ColumnValue::Timestamp(synced_at));
        row.set(
            &self.columns.provenance,
            ColumnValue::Text(self.provenance_tag.clone()),
        );
        row.set(&self.columns.soft_delete, ColumnValue::Bool(false));
        row
    }
}
