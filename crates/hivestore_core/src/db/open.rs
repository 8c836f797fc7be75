//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure pragmas, attach extra databases and select the schema.
//! - Apply caller migrations before returning a usable driver.
//!
//! # Invariants
//! - Returned drivers have `foreign_keys=ON`.
//! - Returned drivers have the configured schema attached and migrated.

use crate::config::DatabaseConfig;
use crate::db::driver::{Driver, DriverError, SqliteDriver};
use crate::db::escape::escape_identifier;
use crate::db::migrations::{apply_migrations, Migration};
use crate::db::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens the configured database and returns a ready [`SqliteDriver`].
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_driver(config: &DatabaseConfig, migrations: &[Migration]) -> DbResult<SqliteDriver> {
    let started_at = Instant::now();
    let mode = if config.path.is_some() { "file" } else { "memory" };
    info!("event=db_open module=db status=start mode={mode}");

    config.validate()?;

    let opened = match &config.path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=connection_failed",
                mode,
                started_at.elapsed().as_millis()
            );
            return Err(DbError::ConnectionFailed {
                target: config.target(),
                source: err.into(),
            });
        }
    };

    let mut driver = SqliteDriver::new(conn);
    match bootstrap_driver(&mut driver, config, migrations) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(driver)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={}",
                mode,
                started_at.elapsed().as_millis(),
                err.code()
            );
            Err(err)
        }
    }
}

fn bootstrap_driver(
    driver: &mut SqliteDriver,
    config: &DatabaseConfig,
    migrations: &[Migration],
) -> DbResult<()> {
    let connection_failed = |err: rusqlite::Error| DbError::ConnectionFailed {
        target: config.target(),
        source: err.into(),
    };

    driver
        .raw()
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(connection_failed)?;
    driver
        .raw()
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(connection_failed)?;

    for (alias, path) in &config.attach {
        let sql = format!(
            "ATTACH DATABASE '{}' AS {};",
            driver.escape(&path.to_string_lossy()),
            escape_identifier(alias)?
        );
        driver
            .execute_batch(&sql)
            .map_err(|source| DbError::ConnectionFailed {
                target: path.display().to_string(),
                source,
            })?;
    }

    select_schema(driver.raw(), &config.schema)?;
    apply_migrations(driver.raw_mut(), &config.schema, migrations)?;
    Ok(())
}

/// Verifies that `schema` names a database attached to `conn`.
fn select_schema(conn: &Connection, schema: &str) -> DbResult<()> {
    let schema_failed = |source: DriverError| DbError::SchemaSelectFailed {
        schema: schema.to_string(),
        source,
    };

    let schema_sql =
        escape_identifier(schema).map_err(|err| schema_failed(DriverError::other(err.to_string())))?;
    conn.query_row(&format!("PRAGMA {schema_sql}.schema_version;"), [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|_| ())
    .map_err(|err| schema_failed(err.into()))
}
