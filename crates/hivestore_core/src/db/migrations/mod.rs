//! Caller-supplied schema migrations.
//!
//! # Responsibility
//! - Apply resource-table migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version` of the
//!   schema the migrations target.

use crate::db::driver::DriverError;
use crate::db::escape::escape_identifier;
use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One versioned schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: u32, sql: &'static str) -> Self {
        Self { version, sql }
    }
}

/// Returns the latest version in `migrations`, `0` for an empty list.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Applies every migration newer than the schema's `user_version`.
///
/// An empty list leaves the schema alone, whatever its version.
pub fn apply_migrations(
    conn: &mut Connection,
    schema: &str,
    migrations: &[Migration],
) -> DbResult<()> {
    validate_order(migrations)?;
    if migrations.is_empty() {
        return Ok(());
    }

    let schema_sql = escape_identifier(schema)?;
    let current_version = current_user_version(conn, &schema_sql)?;
    let latest = latest_version(migrations);

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let failed = |version: u32, err: rusqlite::Error| DbError::MigrationFailed {
        version,
        source: err.into(),
    };

    let tx = conn.transaction().map_err(|err| failed(current_version, err))?;
    for migration in migrations {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)
            .map_err(|err| failed(migration.version, err))?;
        tx.execute_batch(&format!(
            "PRAGMA {schema_sql}.user_version = {};",
            migration.version
        ))
        .map_err(|err| failed(migration.version, err))?;
    }
    tx.commit().map_err(|err| failed(latest, err))?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, latest
    );
    Ok(())
}

/// Reads `PRAGMA user_version` of `schema`.
pub fn user_version(conn: &Connection, schema: &str) -> DbResult<u32> {
    current_user_version(conn, &escape_identifier(schema)?)
}

fn current_user_version(conn: &Connection, schema_sql: &str) -> DbResult<u32> {
    conn.query_row(&format!("PRAGMA {schema_sql}.user_version;"), [], |row| {
        row.get::<_, u32>(0)
    })
    .map_err(|err| DbError::MigrationFailed {
        version: 0,
        source: err.into(),
    })
}

fn validate_order(migrations: &[Migration]) -> DbResult<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(DbError::MigrationFailed {
                version: pair[1].version,
                source: DriverError::other(format!(
                    "migration versions must increase, got {} after {}",
                    pair[1].version, pair[0].version
                )),
            });
        }
    }
    Ok(())
}
