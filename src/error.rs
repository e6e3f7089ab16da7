// ABOUTME: Fault taxonomy for the reconciliation engine
// ABOUTME: Connection faults abort a pass; every other variant stays local to one entry

use thiserror::Error;

/// Faults the engine distinguishes when deciding what to do next.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store could not be reached. The pass is abandoned and retried after
    /// the next interval.
    #[error("Failed to connect to {store}: {source:#}")]
    Connection {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The source row for an INSERT/UPDATE entry no longer exists.
    #[error("Source row {key} not found")]
    RowNotFound { key: String },

    /// The destination rejected the write.
    #[error("{action} failed for {key}: {reason}")]
    Apply {
        action: String,
        key: String,
        reason: String,
    },

    /// The entry's action is not INSERT, UPDATE or DELETE.
    #[error("Unknown action '{action}' for {key}")]
    UnknownAction { action: String, key: String },

    /// A derived column could not be computed from its raw input.
    #[error("Cannot derive {column} from '{raw}': {reason}")]
    DerivedField {
        column: &'static str,
        raw: String,
        reason: String,
    },
}

impl SyncError {
    pub fn connection(store: &'static str, source: anyhow::Error) -> Self {
        SyncError::Connection { store, source }
    }

    /// True for faults that end the whole pass rather than one entry.
    pub fn aborts_pass(&self) -> bool {
        matches!(self, SyncError::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = SyncError::RowNotFound {
            key: "1001-P01".to_string(),
        };
        assert_eq!(err.to_string(), "Source row 1001-P01 not found");

        let err = SyncError::Apply {
            action: "DELETE".to_string(),
            key: "7-P02".to_string(),
            reason: "no destination row to flag".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "DELETE failed for 7-P02: no destination row to flag"
        );
    }

    #[test]
    fn test_only_connection_aborts_pass() {
        let conn = SyncError::connection("source", anyhow::anyhow!("refused"));
        assert!(conn.aborts_pass());
        assert_eq!(conn.to_string(), "Failed to connect to source: refused");

        let unknown = SyncError::UnknownAction {
            action: "TRUNCATE".to_string(),
            key: "1-P".to_string(),
        };
        assert!(!unknown.aborts_pass());
    }
}
