// ABOUTME: status command - summarizes the local change log
// ABOUTME: Counts entries per status and entries still waiting to be forwarded

use anyhow::Result;
use clap::Args;

use crate::config::{ConnectionArgs, SyncConfig};
use crate::connector::LiveConnector;
use crate::sync::{ChangeLogStore, LogSummary};
use crate::utils::strip_password_from_url;

#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub fn render(log_table: &str, summary: &LogSummary) -> String {
    let mut out = format!("Change log {}\n", log_table);
    if summary.by_status.is_empty() {
        out.push_str("  (empty)\n");
    }
    for (status, count) in &summary.by_status {
        out.push_str(&format!("  {:<10} {}\n", status, count));
    }
    out.push_str(&format!("  Not yet forwarded: {}\n", summary.unforwarded));
    out
}

pub async fn status(args: StatusArgs) -> Result<()> {
    let config = SyncConfig::from_args(args.connection)?;
    tracing::info!(
        "Reading change log from {}",
        strip_password_from_url(&config.source_url)
    );

    let store = LiveConnector::new(&config).connect_log().await?;
    let summary = store.summary().await;
    if let Err(e) = store.close().await {
        tracing::warn!("{:#}", e);
    }

    print!("{}", render(&config.log_table, &summary?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_summary() {
        let summary = LogSummary {
            by_status: vec![("FAILED".to_string(), 2), ("PENDING".to_string(), 5)],
            unforwarded: 7,
        };
        assert_eq!(
            render("data_timbang_log", &summary),
            "Change log data_timbang_log\n  FAILED     2\n  PENDING    5\n  Not yet forwarded: 7\n"
        );
    }

    #[test]
    fn test_render_empty_log() {
        let summary = LogSummary::default();
        assert!(render("log", &summary).contains("(empty)"));
    }
}
