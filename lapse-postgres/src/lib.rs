//! Lapse Postgres
//!
//! Postgres implementation of the Lapse job storage contract.
//!
//! - `config`: connection, schema and batching settings
//! - `db`: connection pool and schema installation
//! - `storage`: the [`PgJobStorage`] backend itself

pub mod config;
pub mod db;
pub mod storage;

pub use config::PgStorageConfig;
pub use storage::PgJobStorage;
