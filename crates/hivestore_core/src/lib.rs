//! Data-access layer between resource objects and a SQLite store.
//!
//! Builds statements from attribute maps, drives one transaction per
//! connection, stores soft "converged" attributes in a single blob column and
//! provides named advisory locks for cross-process serialization.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::DatabaseConfig;
pub use db::migrations::Migration;
pub use db::query::AttributeMap;
pub use db::{Connection, DbError, DbResult, Driver, LockWait, SqliteDriver};
pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LoggingConfig,
};
pub use model::converged::{ConvergedBlob, ConvergedValue};
pub use model::resource::{
    ConvergedColumn, ConvergedType, Resource, ResourceDescriptor, ResourceRegistry,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
