// ABOUTME: SyncDaemon - opens fresh connections per pass, reconciles, forwards, then sleeps
// ABOUTME: Pass failures are logged with dedup and retried; only shutdown ends the loop

use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tokio::sync::broadcast;

use super::dedup::DedupChannel;
use super::forwarder::{ForwardStats, LogForwarder};
use super::store::{Connector, Session};
use super::worker::{BatchStats, EngineSettings, EngineState, Reconciler};
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Configuration for the SyncDaemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Sleep between the end of one pass and the start of the next
    pub sync_interval: Duration,
    /// Forward log entries to the central log after reconciling
    pub forward: bool,
    /// Maximum log entries forwarded per pass
    pub forward_batch_size: usize,
}

impl DaemonConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            sync_interval: config.sync_interval,
            forward: true,
            forward_batch_size: config.forward_batch_size,
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub reconcile: BatchStats,
    /// `None` when forwarding is disabled or its batch failed.
    pub forward: Option<ForwardStats>,
}

pub struct SyncDaemon<C: Connector> {
    connector: C,
    config: DaemonConfig,
    settings: EngineSettings,
    state: EngineState,
    forward_idle: DedupChannel,
    forward_errors: DedupChannel,
    main_errors: DedupChannel,
}

impl<C: Connector> SyncDaemon<C> {
    pub fn new(connector: C, config: DaemonConfig, settings: EngineSettings) -> Self {
        Self {
            connector,
            config,
            settings,
            state: EngineState::new(),
            forward_idle: DedupChannel::new(),
            forward_errors: DedupChannel::new(),
            main_errors: DedupChannel::new(),
        }
    }

    /// Run one pass: connect, reconcile pending entries, forward the log,
    /// and close the connections whether or not the work succeeded.
    pub async fn run_pass(&mut self) -> Result<PassReport> {
        let session = self.connector.connect().await?;
        let result = self.run_with(session.as_ref()).await;
        session.close().await;
        result
    }

    async fn run_with(&mut self, session: &dyn Session) -> Result<PassReport> {
        let synced_at = Local::now().naive_local();
        let reconciler = Reconciler::new(
            session.log(),
            session.source(),
            session.destination(),
            &self.settings,
        );
        let reconcile = reconciler.run_batch(&mut self.state, synced_at).await?;
        if reconcile.seen > 0 {
            tracing::info!(
                "Reconcile pass: {} seen, {} applied, {} unchanged, {} failed, {} deferred, {} superseded in {}ms",
                reconcile.seen,
                reconcile.applied,
                reconcile.unchanged,
                reconcile.failed,
                reconcile.deferred,
                reconcile.superseded,
                reconcile.duration_ms
            );
        }

        let forward = if self.config.forward {
            let forwarder = LogForwarder::new(
                session.log(),
                session.central(),
                self.config.forward_batch_size,
            );
            match forwarder.run_batch(&mut self.forward_idle).await {
                Ok(stats) => {
                    self.forward_errors.clear();
                    Some(stats)
                }
                Err(e) => {
                    let raw = format!("{:#}", e);
                    if self.forward_errors.should_emit(&raw) {
                        tracing::error!("Log forwarding failed: {}", raw);
                    }
                    None
                }
            }
        } else {
            None
        };

        Ok(PassReport { reconcile, forward })
    }

    /// Run a pass and absorb its failure into the main error channel.
    pub async fn run_cycle(&mut self) -> Option<PassReport> {
        match self.run_pass().await {
            Ok(report) => {
                if self.main_errors.clear() {
                    tracing::info!("Connections are healthy again");
                }
                Some(report)
            }
            Err(e) => {
                let raw = format!("{:#}", e);
                if self.main_errors.should_emit(&raw) {
                    let connection_lost = e
                        .downcast_ref::<SyncError>()
                        .is_some_and(SyncError::aborts_pass);
                    if connection_lost {
                        tracing::error!("{}; retrying in {:?}", raw, self.config.sync_interval);
                    } else {
                        tracing::error!("Sync pass failed: {}", raw);
                    }
                }
                None
            }
        }
    }

    /// Run passes until a shutdown signal arrives.
    ///
    /// A pass is never interrupted; shutdown is only observed while sleeping.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(
            "Starting SyncDaemon with sync_interval={:?}, forwarding {}",
            self.config.sync_interval,
            if self.config.forward { "enabled" } else { "disabled" }
        );

        loop {
            self.run_cycle().await;

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping SyncDaemon");
                    break;
                }
                _ = tokio::time::sleep(self.config.sync_interval) => {}
            }
        }

        Ok(())
    }
}
