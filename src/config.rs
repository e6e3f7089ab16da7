// ABOUTME: Runtime configuration - connection endpoints, table names, intervals and column layout
// ABOUTME: Built from CLI/environment settings plus an optional TOML layout file

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;

use crate::utils::{validate_connection_string, validate_identifier, validate_table_name};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_FORWARD_BATCH_SIZE: usize = 100;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 3;

/// Connection and scheduling settings, each readable from the environment.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// MySQL URL holding the business table and its change log
    #[arg(long = "source", env = "SOURCE_MYSQL_URL")]
    pub source_url: String,
    /// PostgreSQL URL holding the replicated table and the central log
    #[arg(long = "destination", env = "DESTINATION_POSTGRES_URL")]
    pub destination_url: String,
    /// Business table on the source
    #[arg(long, env = "SOURCE_TABLE")]
    pub source_table: String,
    /// Change log table on the source
    #[arg(long, env = "LOG_TABLE")]
    pub log_table: String,
    /// Replicated table on the destination
    #[arg(long, env = "DESTINATION_TABLE")]
    pub destination_table: String,
    /// Central log table on the destination
    #[arg(long, env = "CENTRAL_LOG_TABLE")]
    pub central_log_table: String,
    /// Provenance tag stamped on every replicated row
    #[arg(long, env = "PROVENANCE_TAG", default_value = "DEFAULT_WB")]
    pub provenance_tag: String,
    /// Name this process reports in heartbeats and log acknowledgements
    #[arg(long, env = "PROCESS_NAME")]
    pub process_name: Option<String>,
    /// Seconds to sleep between passes
    #[arg(long, env = "SYNC_INTERVAL", default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    pub sync_interval: u64,
    /// Maximum pending entries reconciled per pass (unbounded if unset)
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,
    /// Maximum log entries forwarded per pass
    #[arg(long, env = "FORWARD_BATCH_SIZE", default_value_t = DEFAULT_FORWARD_BATCH_SIZE)]
    pub forward_batch_size: usize,
    /// Base URL of the heartbeat monitor (heartbeat disabled if unset)
    #[arg(long, env = "HEARTBEAT_URL")]
    pub heartbeat_url: Option<String>,
    /// TOML file overriding column names and the diff skip-list
    #[arg(long, env = "LAYOUT_FILE")]
    pub layout: Option<PathBuf>,
}

/// Names of the business columns the engine reads or derives.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnLayout {
    /// Primary identifier half of the composite key
    pub id: String,
    /// Partition identifier half of the composite key
    pub partition: String,
    /// Raw event timestamp the shift date is derived from
    pub event_time: String,
    /// Derived shift-date column
    pub shift_date: String,
    /// Wall-clock time of the pass that wrote the row
    pub sync_time: String,
    /// Provenance tag column
    pub provenance: String,
    /// Soft-delete flag on the destination
    pub soft_delete: String,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            id: "nourut1".to_string(),
            partition: "plant_id".to_string(),
            event_time: "tanggal2".to_string(),
            shift_date: "tanggal_shift".to_string(),
            sync_time: "date_sync".to_string(),
            provenance: "wb_tag".to_string(),
            soft_delete: "deleted".to_string(),
        }
    }
}

impl ColumnLayout {
    fn validate(&self) -> Result<()> {
        for name in [
            &self.id,
            &self.partition,
            &self.event_time,
            &self.shift_date,
            &self.sync_time,
            &self.provenance,
            &self.soft_delete,
        ] {
            validate_identifier(name).context("Invalid column name in [columns]")?;
        }
        Ok(())
    }
}

/// Column names of the change log table (key columns come from [`ColumnLayout`]).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogColumns {
    pub action: String,
    pub status: String,
    pub attempt: String,
    pub message: String,
    pub logged_at: String,
    pub forward_status: String,
    pub processed_by: String,
}

impl Default for LogColumns {
    fn default() -> Self {
        Self {
            action: "aksi".to_string(),
            status: "status".to_string(),
            attempt: "counter_done".to_string(),
            message: "message".to_string(),
            logged_at: "log_time".to_string(),
            forward_status: "sync_status".to_string(),
            processed_by: "pc_name".to_string(),
        }
    }
}

impl LogColumns {
    fn validate(&self) -> Result<()> {
        for name in [
            &self.action,
            &self.status,
            &self.attempt,
            &self.message,
            &self.logged_at,
            &self.forward_status,
            &self.processed_by,
        ] {
            validate_identifier(name).context("Invalid column name in [log_columns]")?;
        }
        Ok(())
    }
}

/// Which columns are left out of the change diff.
///
/// The composite key and the sync timestamp are always skipped. Whether the
/// soft-delete flag and the provenance tag take part is a deployment choice:
/// skipping the flag means a row soft-deleted at the destination is never
/// revived by a later INSERT/UPDATE of the same key.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DiffPolicy {
    pub skip_soft_delete: bool,
    pub skip_provenance: bool,
    /// Additional source columns never compared or written on update
    pub skip_columns: Vec<String>,
}

impl DiffPolicy {
    /// The complete skip-list for a given column layout, lowercased.
    pub fn skip_list(&self, columns: &ColumnLayout) -> BTreeSet<String> {
        let mut skip: BTreeSet<String> = [&columns.id, &columns.partition, &columns.sync_time]
            .into_iter()
            .map(|c| c.to_lowercase())
            .collect();
        if self.skip_soft_delete {
            skip.insert(columns.soft_delete.to_lowercase());
        }
        if self.skip_provenance {
            skip.insert(columns.provenance.to_lowercase());
        }
        skip.extend(self.skip_columns.iter().map(|c| c.to_lowercase()));
        skip
    }
}

/// Contents of the optional `--layout` TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LayoutFile {
    pub columns: ColumnLayout,
    pub log_columns: LogColumns,
    pub diff: DiffPolicy,
}

impl LayoutFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse layout file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let layout: LayoutFile = toml::from_str(contents)?;
        layout.columns.validate()?;
        layout.log_columns.validate()?;
        for name in &layout.diff.skip_columns {
            validate_identifier(name).context("Invalid column name in [diff].skip_columns")?;
        }
        Ok(layout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub base_url: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Everything a running replicator needs, validated.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_url: String,
    pub destination_url: String,
    pub source_table: String,
    pub log_table: String,
    pub destination_table: String,
    pub central_log_table: String,
    pub provenance_tag: String,
    pub process_name: String,
    pub sync_interval: Duration,
    pub batch_size: Option<usize>,
    pub forward_batch_size: usize,
    pub heartbeat: Option<HeartbeatConfig>,
    pub columns: ColumnLayout,
    pub log_columns: LogColumns,
    pub diff: DiffPolicy,
}

impl SyncConfig {
    pub fn from_args(args: ConnectionArgs) -> Result<Self> {
        validate_connection_string(&args.source_url, &["mysql"])
            .context("Invalid source URL")?;
        validate_connection_string(&args.destination_url, &["postgres", "postgresql"])
            .context("Invalid destination URL")?;
        for table in [
            &args.source_table,
            &args.log_table,
            &args.destination_table,
            &args.central_log_table,
        ] {
            validate_table_name(table)?;
        }
        if args.sync_interval == 0 {
            bail!("Sync interval must be at least 1 second");
        }
        if args.batch_size == Some(0) || args.forward_batch_size == 0 {
            bail!("Batch sizes must be greater than zero");
        }

        let layout = match &args.layout {
            Some(path) => LayoutFile::load(path)?,
            None => LayoutFile::default(),
        };

        let heartbeat = args.heartbeat_url.map(|url| HeartbeatConfig {
            base_url: url.trim_end_matches('/').to_string(),
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
        });

        Ok(Self {
            source_url: args.source_url,
            destination_url: args.destination_url,
            source_table: args.source_table,
            log_table: args.log_table,
            destination_table: args.destination_table,
            central_log_table: args.central_log_table,
            provenance_tag: args.provenance_tag,
            process_name: args.process_name.unwrap_or_else(default_process_name),
            sync_interval: Duration::from_secs(args.sync_interval),
            batch_size: args.batch_size,
            forward_batch_size: args.forward_batch_size,
            heartbeat,
            columns: layout.columns,
            log_columns: layout.log_columns,
            diff: layout.diff,
        })
    }
}

fn default_process_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "changelog-replicator".to_string())
}
