//! Per-call connection context.
//!
//! # Responsibility
//! - Own the physical driver, transaction controller and advisory locks for
//!   one logical call.
//! - Route every statement through the transaction hooks.
//!
//! # Invariants
//! - Writes auto-start a transaction when `use_transactions` is enabled.
//! - A failed statement forces a rollback before the error is returned.
//! - Dropping the connection commits an open transaction and releases locks.

use crate::config::DatabaseConfig;
use crate::db::coerce::coerce_rows;
use crate::db::driver::{ColumnMeta, Driver, DriverError, DriverErrorKind, SqliteDriver};
use crate::db::escape::escape;
use crate::db::lock::{AdvisoryLockManager, LockWait};
use crate::db::migrations::Migration;
use crate::db::open::open_driver;
use crate::db::query::{describe, AttributeMap};
use crate::db::transaction::TransactionController;
use crate::db::{DbError, DbResult};
use log::{debug, error, warn};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

/// One logical call's handle on the store.
pub struct Connection<D: Driver = SqliteDriver> {
    id: Uuid,
    driver: D,
    schema: String,
    use_transactions: bool,
    read_only: bool,
    transaction: TransactionController,
    locks: AdvisoryLockManager,
}

impl Connection<SqliteDriver> {
    /// Opens a SQLite-backed connection.
    pub fn open(config: &DatabaseConfig) -> DbResult<Self> {
        Self::open_with_migrations(config, &[])
    }

    /// Opens a SQLite-backed connection and applies `migrations` to the
    /// configured schema.
    pub fn open_with_migrations(config: &DatabaseConfig, migrations: &[Migration]) -> DbResult<Self> {
        let driver = open_driver(config, migrations)?;
        Ok(Self::with_driver(driver, config))
    }
}

impl<D: Driver> Connection<D> {
    /// Wraps an already configured driver.
    pub fn with_driver(driver: D, config: &DatabaseConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(
            "event=connection_open module=db status=ok connection_id={} read_only={} use_transactions={}",
            id, config.read_only, config.use_transactions
        );
        Self {
            id,
            driver,
            schema: config.schema.clone(),
            use_transactions: config.use_transactions,
            read_only: config.read_only,
            transaction: TransactionController::new(),
            locks: AdvisoryLockManager::new(config.schema.clone(), config.resolved_lock_dir()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Whether writes are simulated instead of persisted.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_active()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn start_transaction(&mut self) -> DbResult<()> {
        self.transaction.start(&mut self.driver)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.transaction.commit(&mut self.driver)
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.transaction.rollback(&mut self.driver)
    }

    /// Runs a row-returning statement and coerces its values.
    ///
    /// A coercion failure leaves the transaction open: the statement itself
    /// succeeded and earlier writes stay intact.
    pub(crate) fn query_rows(&mut self, sql: &str) -> DbResult<Vec<AttributeMap>> {
        let started_at = Instant::now();
        let result = match self.driver.query(sql) {
            Ok(result) => result,
            Err(err) => return Err(self.statement_failed("db_query", sql, err)),
        };
        debug!(
            "event=db_query module=db status=ok connection_id={} duration_ms={} rows={}",
            self.id,
            started_at.elapsed().as_millis(),
            result.rows.len()
        );
        coerce_rows(result).map_err(|err| {
            warn!(
                "event=db_query module=db status=error connection_id={} error_code={}",
                self.id,
                err.code()
            );
            err
        })
    }

    /// Column metadata of `table` (already qualified), without reading rows.
    pub(crate) fn describe_columns(&mut self, table: &str) -> DbResult<Vec<ColumnMeta>> {
        let sql = describe(table);
        match self.driver.query(&sql) {
            Ok(result) => Ok(result.columns),
            Err(err) => Err(self.statement_failed("db_query", &sql, err)),
        }
    }

    /// Renders `value` as a statement literal.
    ///
    /// With `basic` set, text is only escaped by the driver and left unquoted,
    /// for embedding in caller-built fragments.
    pub fn escape(&self, value: &Value, basic: bool) -> String {
        if !basic {
            return escape(value);
        }
        match value {
            Value::String(text) => self.driver.escape(text),
            other => self.driver.escape(&other.to_string()),
        }
    }

    /// Runs a write statement, starting a transaction first when enabled.
    pub(crate) fn execute_write(&mut self, sql: &str) -> DbResult<u64> {
        if self.use_transactions {
            self.transaction.start(&mut self.driver)?;
        }

        let started_at = Instant::now();
        match self.driver.execute(sql) {
            Ok(changed) => {
                debug!(
                    "event=db_write module=db status=ok connection_id={} duration_ms={} changed={}",
                    self.id,
                    started_at.elapsed().as_millis(),
                    changed
                );
                Ok(changed)
            }
            Err(err) => Err(self.statement_failed("db_write", sql, err)),
        }
    }

    pub(crate) fn last_insert_id(&self) -> i64 {
        self.driver.last_insert_id()
    }

    fn statement_failed(&mut self, event: &str, sql: &str, err: DriverError) -> DbError {
        self.transaction.force_rollback(&mut self.driver);

        let failure = match err.kind {
            DriverErrorKind::UniqueViolation => DbError::DuplicateEntry {
                statement: sql.to_string(),
                source: err,
            },
            DriverErrorKind::Busy | DriverErrorKind::Other => DbError::QueryFailed {
                statement: sql.to_string(),
                source: err,
            },
        };
        error!(
            "event={} module=db status=error connection_id={} error_code={} statement_len={}",
            event,
            self.id,
            failure.code(),
            sql.len()
        );
        failure
    }

    /// Acquires a named advisory lock for this connection.
    pub fn acquire_lock(&mut self, name: &str, wait: impl Into<LockWait>) -> DbResult<()> {
        self.locks.acquire(name, wait.into())
    }

    /// Releases a named advisory lock held by this connection.
    pub fn release_lock(&mut self, name: &str) -> DbResult<()> {
        self.locks.release(name)
    }

    pub fn holds_lock(&self, name: &str) -> bool {
        self.locks.is_held(name)
    }

    /// Runs `operation` while holding `name`, releasing it afterwards even
    /// when the operation fails.
    pub fn with_advisory_lock<T>(
        &mut self,
        name: &str,
        wait: impl Into<LockWait>,
        operation: impl FnOnce(&mut Self) -> DbResult<T>,
    ) -> DbResult<T> {
        self.acquire_lock(name, wait)?;
        let outcome = operation(self);
        let released = self.release_lock(name);
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Commits any open transaction and releases every lock.
    pub fn close(mut self) -> DbResult<()> {
        let committed = self.transaction.commit(&mut self.driver);
        self.locks.release_all();
        committed
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        if self.transaction.is_active() {
            warn!(
                "event=connection_close module=db status=commit_pending connection_id={}",
                self.id
            );
            if let Err(err) = self.transaction.commit(&mut self.driver) {
                error!(
                    "event=connection_close module=db status=error connection_id={} error_code={}",
                    self.id,
                    err.code()
                );
            }
        }
        self.locks.release_all();
    }
}
