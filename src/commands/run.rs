// ABOUTME: run command - starts the heartbeat and the reconciliation daemon
// ABOUTME: --once runs a single pass and reports its statistics

use anyhow::Result;
use clap::Args;
use tokio::sync::broadcast;

use crate::config::{ConnectionArgs, SyncConfig};
use crate::connector::LiveConnector;
use crate::heartbeat::Heartbeat;
use crate::sync::{DaemonConfig, EngineSettings, PassReport, SyncDaemon};
use crate::utils::strip_password_from_url;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Run one pass and exit
    #[arg(long)]
    pub once: bool,
    /// Do not forward change log entries to the central log
    #[arg(long)]
    pub no_forward: bool,
    /// Do not send heartbeats even when a heartbeat URL is set
    #[arg(long)]
    pub no_heartbeat: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = SyncConfig::from_args(args.connection)?;

    tracing::info!(
        "Source: {} (table {}, log {})",
        strip_password_from_url(&config.source_url),
        config.source_table,
        config.log_table
    );
    tracing::info!(
        "Destination: {} (table {}, central log {})",
        strip_password_from_url(&config.destination_url),
        config.destination_table,
        config.central_log_table
    );
    tracing::info!(
        "Process name: {}, provenance tag: {}",
        config.process_name,
        config.provenance_tag
    );

    let mut daemon_config = DaemonConfig::from_config(&config);
    daemon_config.forward = !args.no_forward;
    let mut daemon = SyncDaemon::new(
        LiveConnector::new(&config),
        daemon_config,
        EngineSettings::from_config(&config),
    );

    if args.once {
        let report = daemon.run_pass().await?;
        print_report(&report);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let heartbeat = match (&config.heartbeat, args.no_heartbeat) {
        (Some(hb), false) => Some(
            Heartbeat::new(hb.clone(), &config.process_name)?.spawn(shutdown_tx.subscribe()),
        ),
        _ => {
            tracing::info!("Heartbeat disabled");
            None
        }
    };

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    daemon.run(shutdown_rx).await?;

    if let Some(handle) = heartbeat {
        if let Err(e) = handle.await {
            tracing::warn!("Heartbeat task ended abnormally: {}", e);
        }
    }

    Ok(())
}

fn print_report(report: &PassReport) {
    let stats = &report.reconcile;
    println!();
    println!("========================================");
    println!("Sync pass complete");
    println!("========================================");
    println!("  Entries seen: {}", stats.seen);
    println!("  Applied: {}", stats.applied);
    println!("  Unchanged: {}", stats.unchanged);
    println!("  Failed: {}", stats.failed);
    println!("  Deferred: {}", stats.deferred);
    println!("  Superseded: {}", stats.superseded);
    println!("  Duration: {}ms", stats.duration_ms);
    if let Some(forward) = &report.forward {
        println!(
            "  Forwarded: {} of {} ({} failed)",
            forward.sent, forward.seen, forward.failed
        );
    }
}
