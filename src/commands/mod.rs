// ABOUTME: Command implementations for the replicator CLI
// ABOUTME: Exports run, status, and shift-date commands

pub mod run;
pub mod shift_date;
pub mod status;

pub use run::{run, RunArgs};
pub use shift_date::{shift_date, ShiftDateArgs};
pub use status::{status, StatusArgs};
