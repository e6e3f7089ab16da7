// ABOUTME: Diff & apply engine - reconciles one projected source row against the destination
// ABOUTME: Issues full INSERT, partial UPDATE or soft-DELETE and classifies the outcome

use anyhow::{Context, Result};

use super::diff::{changed_columns, SkipList};
use super::entry::{CompositeKey, SyncOutcome};
use super::store::DestinationStore;
use super::value::{ColumnValue, RowData};
use crate::config::ColumnLayout;

/// Writes projected rows to the destination.
///
/// Destination lookups that fail are returned as `Err` so the caller can
/// defer the entry; write failures are folded into
/// [`SyncOutcome::ApplyFailed`].
pub struct ApplyEngine<'a> {
    destination: &'a dyn DestinationStore,
    columns: &'a ColumnLayout,
    skip: &'a SkipList,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        destination: &'a dyn DestinationStore,
        columns: &'a ColumnLayout,
        skip: &'a SkipList,
    ) -> Self {
        Self {
            destination,
            columns,
            skip,
        }
    }

    /// Bring the destination row for `key` in line with `projected`.
    pub async fn reconcile(&self, key: &CompositeKey, projected: &RowData) -> Result<SyncOutcome> {
        let existing = self
            .destination
            .fetch_row(key)
            .await
            .with_context(|| format!("Failed to read destination row {}", key))?;

        let Some(existing) = existing else {
            return Ok(self.insert(key, projected).await);
        };

        let changed = changed_columns(projected, &existing, self.skip);
        if changed.is_empty() {
            return Ok(SyncOutcome::NoChange);
        }

        let revived = changed
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&self.columns.soft_delete));

        let mut values: RowData = changed
            .iter()
            .map(|c| (c.as_str(), projected.get(c).cloned().unwrap_or(ColumnValue::Null)))
            .collect();
        if let Some(synced_at) = projected.get(&self.columns.sync_time) {
            values.set(&self.columns.sync_time, synced_at.clone());
        }

        let outcome = match self.destination.update_row(key, &values).await {
            Ok(0) => SyncOutcome::ApplyFailed(format!(
                "destination row {} disappeared before update",
                key
            )),
            Ok(_) => {
                tracing::info!(
                    "Partial update of {} ({} column(s): {})",
                    key,
                    changed.len(),
                    changed.join(", ")
                );
                SyncOutcome::Applied {
                    columns: changed,
                    revived,
                }
            }
            Err(e) => SyncOutcome::ApplyFailed(format!("{:#}", e)),
        };
        Ok(outcome)
    }

    async fn insert(&self, key: &CompositeKey, projected: &RowData) -> SyncOutcome {
        match self.destination.insert_row(projected).await {
            Ok(()) => {
                tracing::info!("Inserted {}", key);
                SyncOutcome::Applied {
                    columns: projected.column_names().map(str::to_string).collect(),
                    revived: false,
                }
            }
            Err(e) => SyncOutcome::ApplyFailed(format!("{:#}", e)),
        }
    }

    /// Flag the destination row as deleted. The row itself is kept.
    pub async fn soft_delete(&self, key: &CompositeKey) -> SyncOutcome {
        let mut values = RowData::new();
        values.set(&self.columns.soft_delete, ColumnValue::Bool(true));

        match self.destination.update_row(key, &values).await {
            Ok(0) => {
                SyncOutcome::ApplyFailed(format!("no destination row {} to flag as deleted", key))
            }
            Ok(_) => {
                tracing::info!("Soft-deleted {}", key);
                SyncOutcome::Applied {
                    columns: vec![self.columns.soft_delete.clone()],
                    revived: false,
                }
            }
            Err(e) => SyncOutcome::ApplyFailed(format!("{:#}", e)),
        }
    }
}
