// ABOUTME: Reconciliation worker - runs one batch of pending entries through fetch, apply and ack
// ABOUTME: Per-entry faults never abort the batch; read faults leave the entry PENDING

use std::time::Instant;

use anyhow::Result;
use chrono::NaiveDateTime;

use super::ack::{failure, AckResult, AckTracker};
use super::apply::ApplyEngine;
use super::dedup::{DedupChannel, DedupSet};
use super::diff::SkipList;
use super::entry::{Action, ChangeLogEntry, SyncOutcome};
use super::projector::RowProjector;
use super::reader::ChangeLogReader;
use super::store::{ChangeLogStore, DestinationStore, SourceStore, StatusTransition};
use crate::config::{ColumnLayout, SyncConfig};

/// Immutable settings shared by every pass.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub columns: ColumnLayout,
    pub skip: SkipList,
    pub provenance_tag: String,
    pub processed_by: String,
    pub batch_size: Option<usize>,
}

impl EngineSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            columns: config.columns.clone(),
            skip: SkipList::from_policy(&config.diff, &config.columns),
            provenance_tag: config.provenance_tag.clone(),
            processed_by: config.process_name.clone(),
            batch_size: config.batch_size,
        }
    }
}

/// Log suppression state carried from one pass to the next.
#[derive(Debug, Default)]
pub struct EngineState {
    idle: DedupChannel,
    no_change: DedupSet,
    deferred: DedupSet,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Statistics from one reconciliation batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub seen: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Left PENDING after a read fault.
    pub deferred: usize,
    /// Already settled by another pass or an earlier write in this batch.
    pub superseded: usize,
    pub duration_ms: u64,
}

impl BatchStats {
    /// True when every entry reached a final status.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }
}

/// Processes pending change log entries against one set of connections.
pub struct Reconciler<'a> {
    log: &'a dyn ChangeLogStore,
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    settings: &'a EngineSettings,
    projector: RowProjector,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        log: &'a dyn ChangeLogStore,
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            log,
            source,
            destination,
            settings,
            projector: RowProjector::new(
                settings.columns.clone(),
                settings.provenance_tag.clone(),
            ),
        }
    }

    /// Process one batch of PENDING entries, sequentially and in arrival order.
    ///
    /// `synced_at` is the wall-clock time stamped on every row written in
    /// this batch. Only a failure to read the batch itself is returned.
    pub async fn run_batch(
        &self,
        state: &mut EngineState,
        synced_at: NaiveDateTime,
    ) -> Result<BatchStats> {
        let start = Instant::now();
        let mut stats = BatchStats::default();

        let entries = ChangeLogReader::new(self.log)
            .pending(self.settings.batch_size)
            .await?;

        if entries.is_empty() {
            if state.idle.should_emit("no pending change log entries") {
                tracing::info!("No pending change log entries");
            }
            return Ok(stats);
        }
        state.idle.clear();
        tracing::info!("Found {} pending change log entries; processing", entries.len());

        let ack = AckTracker::new(self.log, &self.settings.processed_by);
        // Writes recorded so far; one may also have settled a later entry of this batch
        let mut claimed: Vec<StatusTransition> = Vec::new();
        for entry in &entries {
            stats.seen += 1;
            if claimed.iter().any(|t| t.covers(entry)) {
                stats.superseded += 1;
                tracing::debug!(
                    "{} {} was settled with an earlier entry; skipping",
                    entry.action,
                    entry.key
                );
                continue;
            }
            if let Some(recorded) = self
                .process_entry(entry, synced_at, &ack, state, &mut stats)
                .await
            {
                claimed.push(recorded);
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn process_entry(
        &self,
        entry: &ChangeLogEntry,
        synced_at: NaiveDateTime,
        ack: &AckTracker<'_>,
        state: &mut EngineState,
        stats: &mut BatchStats,
    ) -> Option<StatusTransition> {
        let (outcome, next_attempt) = match self.reconcile_entry(entry, synced_at, ack).await {
            Ok(result) => result,
            Err(e) => {
                stats.deferred += 1;
                let diagnostic = format!("Error processing {}: {:#}", entry.key, e);
                if state.deferred.first_time(&diagnostic) {
                    tracing::warn!("{}", diagnostic);
                    if let Err(e) = ack.defer(entry, &diagnostic).await {
                        tracing::warn!("{:#}", e);
                    }
                }
                return None;
            }
        };

        let recorded = match ack.acknowledge(entry, &outcome, next_attempt).await {
            Ok(AckResult::Recorded(transition)) => transition,
            Ok(AckResult::Superseded) => {
                stats.superseded += 1;
                tracing::info!(
                    "{} {} was already recorded by another pass; skipping",
                    entry.action,
                    entry.key
                );
                return None;
            }
            Err(e) => {
                stats.deferred += 1;
                tracing::error!("{:#}", e);
                return None;
            }
        };

        match &outcome {
            SyncOutcome::Applied { .. } => stats.applied += 1,
            SyncOutcome::NoChange => {
                stats.unchanged += 1;
                let notice = format!("No changes for {} (attempt {})", entry.key, next_attempt);
                if state.no_change.first_time(&notice) {
                    tracing::info!("{}", notice);
                }
            }
            _ => {
                stats.failed += 1;
                if let Some(err) = failure(entry, &outcome) {
                    tracing::warn!("{}", err);
                }
            }
        }
        Some(recorded)
    }

    /// Work out and apply the outcome for one entry. `Err` is a read fault.
    async fn reconcile_entry(
        &self,
        entry: &ChangeLogEntry,
        synced_at: NaiveDateTime,
        ack: &AckTracker<'_>,
    ) -> Result<(SyncOutcome, i64)> {
        let next_attempt = ack.next_attempt(&entry.key).await?;
        let engine = ApplyEngine::new(
            self.destination,
            &self.settings.columns,
            &self.settings.skip,
        );

        let outcome = match &entry.action {
            Action::Unknown(raw) => SyncOutcome::UnknownAction(raw.clone()),
            Action::Delete => engine.soft_delete(&entry.key).await,
            Action::Insert | Action::Update => {
                match self.projector.fetch(self.source, &entry.key, synced_at).await? {
                    None => SyncOutcome::NotFound,
                    Some(row) => engine.reconcile(&entry.key, &row).await?,
                }
            }
        };

        Ok((outcome, next_attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_stats_success() {
        let stats = BatchStats {
            seen: 3,
            applied: 2,
            unchanged: 1,
            ..BatchStats::default()
        };
        assert!(stats.is_success());
    }

    #[test]
    fn test_batch_stats_with_failures() {
        let stats = BatchStats {
            seen: 2,
            applied: 1,
            deferred: 1,
            ..BatchStats::default()
        };
        assert!(!stats.is_success());
    }
}
