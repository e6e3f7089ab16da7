// ABOUTME: Log forwarder - copies change log entries to the central log store and marks them SENT
// ABOUTME: A failed entry is flagged for retry with a tagged diagnostic; the batch carries on

use std::time::Instant;

use anyhow::{Context, Result};

use super::dedup::DedupChannel;
use super::entry::{diagnostic_suffix, strip_forward_diagnostics, ChangeLogEntry, FORWARD_TAG};
use super::reader::ChangeLogReader;
use super::store::{CentralLogStore, ChangeLogStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardStats {
    pub seen: usize,
    pub sent: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

pub struct LogForwarder<'a> {
    log: &'a dyn ChangeLogStore,
    central: &'a dyn CentralLogStore,
    batch_size: usize,
}

impl<'a> LogForwarder<'a> {
    pub fn new(
        log: &'a dyn ChangeLogStore,
        central: &'a dyn CentralLogStore,
        batch_size: usize,
    ) -> Self {
        Self {
            log,
            central,
            batch_size,
        }
    }

    /// Forward up to one batch of unsent entries, oldest first.
    pub async fn run_batch(&self, idle: &mut DedupChannel) -> Result<ForwardStats> {
        let start = Instant::now();
        let mut stats = ForwardStats::default();

        let entries = ChangeLogReader::new(self.log)
            .unforwarded(self.batch_size)
            .await?;
        if entries.is_empty() {
            if idle.should_emit("no new log entries to forward") {
                tracing::info!("No new log entries to forward");
            }
            return Ok(stats);
        }
        idle.clear();

        for entry in &entries {
            stats.seen += 1;
            match self.forward(entry).await {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    let diagnostic = format!("{:#}", e);
                    tracing::error!("Failed to forward log entry {}: {}", entry.key, diagnostic);
                    if let Err(e) = self
                        .log
                        .mark_forward_failed(entry, &diagnostic_suffix(FORWARD_TAG, &diagnostic))
                        .await
                    {
                        tracing::error!("Failed to flag {} for forward retry: {:#}", entry.key, e);
                    }
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "{} of {} log entries forwarded to the central log",
            stats.sent,
            stats.seen
        );
        Ok(stats)
    }

    async fn forward(&self, entry: &ChangeLogEntry) -> Result<()> {
        let mut copy = entry.clone();
        copy.message = entry.message.as_deref().map(strip_forward_diagnostics);

        self.central
            .insert_entry(&copy)
            .await
            .context("Failed to insert into central log")?;
        self.log
            .mark_forwarded(entry)
            .await
            .context("Failed to mark entry as sent")?;
        Ok(())
    }
}
