// ABOUTME: Log-driven reconciliation engine - replays a change log onto the destination table
// ABOUTME: Reader, projector, diff/apply, ack tracker, error dedup and the log forwarder

pub mod ack;
pub mod apply;
pub mod daemon;
pub mod dedup;
pub mod diff;
pub mod entry;
pub mod forwarder;
pub mod projector;
pub mod reader;
pub mod shift;
pub mod store;
pub mod value;
pub mod worker;

pub use ack::{build_transition, AckResult, AckTracker};
pub use apply::ApplyEngine;
pub use daemon::{DaemonConfig, PassReport, SyncDaemon};
pub use dedup::{normalize_error, DedupChannel, DedupSet};
pub use diff::{changed_columns, SkipList};
pub use entry::{
    Action, ChangeLogEntry, CompositeKey, EntryStatus, ForwardStatus, SyncOutcome, FORWARD_TAG,
    RECONCILE_TAG,
};
pub use forwarder::{ForwardStats, LogForwarder};
pub use projector::RowProjector;
pub use reader::ChangeLogReader;
pub use shift::{derive_shift_date, parse_timestamp, shift_date, Shift, ShiftDate};
pub use store::{
    CentralLogStore, ChangeLogStore, Connector, DestinationStore, LogSummary, MessageUpdate,
    Session, SourceStore, StatusTransition,
};
pub use value::{ColumnValue, RowData};
pub use worker::{BatchStats, EngineSettings, EngineState, Reconciler};
