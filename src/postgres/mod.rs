// ABOUTME: PostgreSQL side of the replicator - destination table and central log
// ABOUTME: Re-exports connection setup and the store implementation

pub mod connection;
pub mod store;

pub use connection::{connect, init_tls_policy, PgConnection};
pub use store::{column_value, DestinationQueries, PgStore};
