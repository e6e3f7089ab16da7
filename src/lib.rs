// ABOUTME: Library root for changelog-replicator
// ABOUTME: Change-log driven MySQL to PostgreSQL row reconciliation

pub mod commands;
pub mod config;
pub mod connector;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod mysql;
pub mod postgres;
pub mod sync;
pub mod utils;
