//! SQLite storage access: connection bootstrap, statement building, and the
//! per-connection transaction and lock machinery.
//!
//! # Responsibility
//! - Open and configure SQLite connections for resource storage.
//! - Turn attribute maps into safe statement text.
//! - Drive transactions and advisory locks for one logical call.
//!
//! # Invariants
//! - Statement text only ever contains validated identifiers and escaped values.
//! - A failed statement never leaves a transaction open.
//! - Migration version is tracked via `PRAGMA user_version`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod coerce;
pub mod connection;
pub mod driver;
pub mod escape;
pub mod lock;
pub mod migrations;
mod open;
pub mod query;
pub mod transaction;

pub use connection::Connection;
pub use driver::{ColumnMeta, Driver, DriverError, DriverErrorKind, ResultSet, SqliteDriver};
pub use lock::{AdvisoryLockManager, LockWait};
pub use open::open_driver;

pub type DbResult<T> = Result<T, DbError>;

/// Typed failure for every data-access operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DbError {
    /// The physical connection could not be opened or configured.
    ConnectionFailed { target: String, source: DriverError },
    /// The configured schema is not attached to the connection.
    SchemaSelectFailed { schema: String, source: DriverError },
    TransactionStartFailed(DriverError),
    CommitFailed(DriverError),
    RollbackFailed(DriverError),
    /// Identifier contains characters outside `[A-Za-z0-9_]`.
    InvalidIdentifier(String),
    /// Predicate operator outside the supported comparison set.
    InvalidOperator { column: String, operator: String },
    /// Predicate object is shaped wrong, e.g. `between` without two bounds.
    InvalidPredicate { column: String, message: String },
    /// Uniqueness constraint violation.
    DuplicateEntry { statement: String, source: DriverError },
    /// Generic statement execution failure.
    QueryFailed { statement: String, source: DriverError },
    /// Update without the `<table>_id` attribute.
    MissingIdentifier { table: String },
    /// Update carrying nothing but the primary key.
    EmptyUpdate { table: String },
    /// Row addressed by primary key does not exist.
    RowNotFound { table: String, id: i64 },
    /// A soft column shares its name with a physical column.
    ConvergedColumnCollision { table: String, column: String },
    /// A soft column value cannot be represented as its declared type.
    ConvergedTypeMismatch { column: String, expected: &'static str },
    /// A JSON-bearing column holds text that does not parse.
    MalformedJson { column: String, message: String },
    /// Resource descriptor is unusable.
    InvalidResource { table: String, message: String },
    LockUnavailable { name: String },
    LockNotOwned { name: String },
    LockNotFound { name: String },
    InvalidLockName(String),
    /// Lock store I/O failed for reasons other than contention.
    LockFailed { name: String, source: DriverError },
    InvalidConfig(String),
    MigrationFailed { version: u32, source: DriverError },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::SchemaSelectFailed { .. } => "schema_select_failed",
            Self::TransactionStartFailed(_) => "transaction_start_failed",
            Self::CommitFailed(_) => "commit_failed",
            Self::RollbackFailed(_) => "rollback_failed",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::InvalidOperator { .. } => "invalid_operator",
            Self::InvalidPredicate { .. } => "invalid_predicate",
            Self::DuplicateEntry { .. } => "duplicate_entry",
            Self::QueryFailed { .. } => "query_failed",
            Self::MissingIdentifier { .. } => "missing_identifier",
            Self::EmptyUpdate { .. } => "empty_update",
            Self::RowNotFound { .. } => "row_not_found",
            Self::ConvergedColumnCollision { .. } => "converged_column_collision",
            Self::ConvergedTypeMismatch { .. } => "converged_type_mismatch",
            Self::MalformedJson { .. } => "malformed_json",
            Self::InvalidResource { .. } => "invalid_resource",
            Self::LockUnavailable { .. } => "lock_unavailable",
            Self::LockNotOwned { .. } => "lock_not_owned",
            Self::LockNotFound { .. } => "lock_not_found",
            Self::InvalidLockName(_) => "invalid_lock_name",
            Self::LockFailed { .. } => "lock_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::UnsupportedSchemaVersion { .. } => "unsupported_schema_version",
        }
    }

    /// Structured context for error-reporting collaborators.
    ///
    /// Keys are stable; values may contain statement text, so callers decide
    /// whether they are safe to persist.
    pub fn extra_info(&self) -> Vec<(&'static str, String)> {
        let mut info = vec![("code", self.code().to_string())];
        match self {
            Self::ConnectionFailed { target, source } => {
                info.push(("target", target.clone()));
                info.push(("store_error", source.message.clone()));
            }
            Self::SchemaSelectFailed { schema, source } => {
                info.push(("schema", schema.clone()));
                info.push(("store_error", source.message.clone()));
            }
            Self::TransactionStartFailed(source)
            | Self::CommitFailed(source)
            | Self::RollbackFailed(source) => info.push(("store_error", source.message.clone())),
            Self::InvalidIdentifier(identifier) => info.push(("identifier", identifier.clone())),
            Self::InvalidOperator { column, operator } => {
                info.push(("column", column.clone()));
                info.push(("operator", operator.clone()));
            }
            Self::InvalidPredicate { column, message } => {
                info.push(("column", column.clone()));
                info.push(("message", message.clone()));
            }
            Self::DuplicateEntry { statement, source }
            | Self::QueryFailed { statement, source } => {
                info.push(("statement", statement.clone()));
                info.push(("store_error", source.message.clone()));
            }
            Self::MissingIdentifier { table } | Self::EmptyUpdate { table } => {
                info.push(("table", table.clone()));
            }
            Self::RowNotFound { table, id } => {
                info.push(("table", table.clone()));
                info.push(("id", id.to_string()));
            }
            Self::ConvergedColumnCollision { table, column } => {
                info.push(("table", table.clone()));
                info.push(("column", column.clone()));
            }
            Self::ConvergedTypeMismatch { column, expected } => {
                info.push(("column", column.clone()));
                info.push(("expected", (*expected).to_string()));
            }
            Self::MalformedJson { column, message } => {
                info.push(("column", column.clone()));
                info.push(("message", message.clone()));
            }
            Self::InvalidResource { table, message } => {
                info.push(("table", table.clone()));
                info.push(("message", message.clone()));
            }
            Self::LockUnavailable { name }
            | Self::LockNotOwned { name }
            | Self::LockNotFound { name } => info.push(("lock", name.clone())),
            Self::InvalidLockName(name) => info.push(("lock", name.clone())),
            Self::LockFailed { name, source } => {
                info.push(("lock", name.clone()));
                info.push(("store_error", source.message.clone()));
            }
            Self::InvalidConfig(message) => info.push(("message", message.clone())),
            Self::MigrationFailed { version, source } => {
                info.push(("version", version.to_string()));
                info.push(("store_error", source.message.clone()));
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => {
                info.push(("db_version", db_version.to_string()));
                info.push(("latest_supported", latest_supported.to_string()));
            }
        }
        info
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { target, source } => {
                write!(f, "failed to connect to `{target}`: {source}")
            }
            Self::SchemaSelectFailed { schema, source } => {
                write!(f, "failed to select schema `{schema}`: {source}")
            }
            Self::TransactionStartFailed(source) => {
                write!(f, "failed to start transaction: {source}")
            }
            Self::CommitFailed(source) => write!(f, "failed to commit transaction: {source}"),
            Self::RollbackFailed(source) => {
                write!(f, "failed to roll back transaction: {source}")
            }
            Self::InvalidIdentifier(identifier) => {
                write!(f, "invalid identifier `{identifier}`")
            }
            Self::InvalidOperator { column, operator } => {
                write!(f, "invalid operator `{operator}` for column `{column}`")
            }
            Self::InvalidPredicate { column, message } => {
                write!(f, "invalid predicate for column `{column}`: {message}")
            }
            Self::DuplicateEntry { source, .. } => write!(f, "duplicate entry: {source}"),
            Self::QueryFailed { source, .. } => write!(f, "query failed: {source}"),
            Self::MissingIdentifier { table } => {
                write!(f, "update on `{table}` requires attribute `{table}_id`")
            }
            Self::EmptyUpdate { table } => {
                write!(f, "update on `{table}` has no attributes besides the id")
            }
            Self::RowNotFound { table, id } => write!(f, "row `{table}_id = {id}` not found"),
            Self::ConvergedColumnCollision { table, column } => write!(
                f,
                "converged column `{column}` collides with a physical column of `{table}`"
            ),
            Self::ConvergedTypeMismatch { column, expected } => {
                write!(f, "converged column `{column}` expects a {expected} value")
            }
            Self::MalformedJson { column, message } => {
                write!(f, "column `{column}` holds malformed JSON: {message}")
            }
            Self::InvalidResource { table, message } => {
                write!(f, "invalid resource `{table}`: {message}")
            }
            Self::LockUnavailable { name } => write!(f, "lock `{name}` is unavailable"),
            Self::LockNotOwned { name } => {
                write!(f, "lock `{name}` is held by another connection")
            }
            Self::LockNotFound { name } => write!(f, "lock `{name}` does not exist"),
            Self::InvalidLockName(name) => write!(f, "invalid lock name `{name}`"),
            Self::LockFailed { name, source } => write!(f, "lock `{name}` failed: {source}"),
            Self::InvalidConfig(message) => write!(f, "invalid database config: {message}"),
            Self::MigrationFailed { version, source } => {
                write!(f, "migration {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectionFailed { source, .. }
            | Self::SchemaSelectFailed { source, .. }
            | Self::TransactionStartFailed(source)
            | Self::CommitFailed(source)
            | Self::RollbackFailed(source)
            | Self::DuplicateEntry { source, .. }
            | Self::QueryFailed { source, .. }
            | Self::LockFailed { source, .. }
            | Self::MigrationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
