// ABOUTME: Change log entry model - composite keys, actions, statuses and sync outcomes
// ABOUTME: Also owns the tagged diagnostic suffix format appended to log messages

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use regex::Regex;

use super::value::ColumnValue;

/// Tag appended by the reconciliation engine to a failed entry's message.
pub const RECONCILE_TAG: &str = "[reconcile]";
/// Tag appended by the log forwarder when copying an entry fails.
pub const FORWARD_TAG: &str = "[forward]";

/// The (primary identifier, partition identifier) pair naming one business row.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeKey {
    pub id: ColumnValue,
    pub partition: ColumnValue,
}

impl CompositeKey {
    pub fn new(id: impl Into<ColumnValue>, partition: impl Into<ColumnValue>) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.partition)
    }
}

/// The mutation a change log entry asks to replicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Insert,
    Update,
    Delete,
    /// Any action text the engine does not recognize, kept verbatim.
    Unknown(String),
}

impl Action {
    /// Parse the action column. A missing action means UPDATE.
    pub fn parse(raw: Option<&str>) -> Self {
        let normalized = raw.map(|s| s.trim().to_uppercase()).unwrap_or_default();
        match normalized.as_str() {
            "" | "UPDATE" => Action::Update,
            "INSERT" => Action::Insert,
            "DELETE" => Action::Delete,
            _ => Action::Unknown(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Pending,
    Success,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Success => "SUCCESS",
            EntryStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(EntryStatus::Pending),
            "SUCCESS" => Ok(EntryStatus::Success),
            "FAILED" => Ok(EntryStatus::Failed),
            other => bail!("unknown change log status: {other}"),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry has been copied to the central log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    Unset,
    Sent,
    Retry,
}

impl ForwardStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_uppercase()).as_deref() {
            Some("SENT") => ForwardStatus::Sent,
            Some("PENDING") => ForwardStatus::Retry,
            _ => ForwardStatus::Unset,
        }
    }
}

/// One detected mutation, as stored in the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogEntry {
    pub key: CompositeKey,
    pub action: Action,
    pub status: EntryStatus,
    /// Attempt counter; starts at 0 and only ever grows.
    pub attempt: i64,
    pub message: Option<String>,
    pub logged_at: NaiveDateTime,
    pub forward_status: ForwardStatus,
    pub processed_by: Option<String>,
}

/// Result of reconciling one change log entry against the destination.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A write was issued. `columns` lists what it set; `revived` is true
    /// when the write cleared the destination's soft-delete flag.
    Applied { columns: Vec<String>, revived: bool },
    /// Source and destination already agree; nothing was written.
    NoChange,
    /// The source row vanished before it could be read.
    NotFound,
    /// The destination write failed.
    ApplyFailed(String),
    /// The entry's action is not one the engine knows how to replicate.
    UnknownAction(String),
}

/// Build the suffix appended to an existing message for a tagged diagnostic.
pub fn diagnostic_suffix(tag: &str, diagnostic: &str) -> String {
    format!(" | {} : {}", tag, diagnostic)
}

static FORWARD_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)\s*\|\s*{}.*", regex::escape(FORWARD_TAG)))
        .expect("forward suffix pattern is valid")
});

/// Remove every diagnostic the forwarder appended, so repeated forward
/// attempts don't grow the message without bound.
pub fn strip_forward_diagnostics(message: &str) -> String {
    FORWARD_SUFFIX.replace(message, "").trim().to_string()
}
