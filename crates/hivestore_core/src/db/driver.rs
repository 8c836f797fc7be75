//! Narrow driver seam between the data layer and the physical store.
//!
//! # Responsibility
//! - Execute statement text and return row sets with column metadata.
//! - Classify store failures so callers can special-case duplicates.
//!
//! # Invariants
//! - The driver never interprets statement text; it only runs it.
//! - Row values are returned raw; type coercion happens above this layer.

use crate::db::escape::escape_basic;
use rusqlite::types::ValueRef;
use rusqlite::ErrorCode;
use serde_json::{Number, Value};
use std::fmt::{Display, Formatter};

/// Store metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared column type, e.g. `DECIMAL(5,1)`. `None` for expressions.
    pub decl_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, decl_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.map(str::to_string),
        }
    }
}

/// Raw result of a query: column metadata plus positional row values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Unique or primary key constraint violation.
    UniqueViolation,
    /// The store is locked by another connection.
    Busy,
    Other,
}

/// Failure reported by a [`Driver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            message: message.into(),
        }
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DriverError {}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        classify(err)
    }
}

/// Minimal statement interface required by [`crate::db::Connection`].
pub trait Driver {
    /// Runs one statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;
    /// Runs one or more statements that return no rows.
    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError>;
    /// Runs one row-returning statement.
    fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError>;
    /// Row id assigned by the most recent successful insert.
    fn last_insert_id(&self) -> i64;
    /// Store-level escape of raw text without surrounding quotes.
    fn escape(&self, raw: &str) -> String {
        escape_basic(raw)
    }
}

/// [`Driver`] backed by one `rusqlite` connection.
pub struct SqliteDriver {
    conn: rusqlite::Connection,
}

impl SqliteDriver {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Borrows the underlying connection for bootstrap work.
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn raw_mut(&mut self) -> &mut rusqlite::Connection {
        &mut self.conn
    }

    fn run_query(&self, sql: &str) -> rusqlite::Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|column| ColumnMeta::new(column.name(), column.decl_type()))
            .collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(width);
            for index in 0..width {
                record.push(value_from_ref(row.get_ref(index)?));
            }
            values.push(record);
        }

        Ok(ResultSet {
            columns,
            rows: values,
        })
    }
}

impl Driver for SqliteDriver {
    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.conn
            .execute(sql, [])
            .map(|changed| changed as u64)
            .map_err(classify)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql).map_err(classify)
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        self.run_query(sql).map_err(classify)
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => Number::from_f64(number).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Maps a `rusqlite` failure onto a [`DriverError`].
///
/// Extended result codes are authoritative; the message check only covers
/// builds that do not report extended codes.
fn classify(err: rusqlite::Error) -> DriverError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                DriverErrorKind::UniqueViolation
            } else if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                DriverErrorKind::Busy
            } else if message
                .as_deref()
                .is_some_and(|text| text.contains("UNIQUE constraint failed"))
            {
                DriverErrorKind::UniqueViolation
            } else {
                DriverErrorKind::Other
            }
        }
        _ => DriverErrorKind::Other,
    };

    DriverError {
        kind,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Driver, DriverErrorKind, SqliteDriver};
    use serde_json::json;

    fn driver() -> SqliteDriver {
        SqliteDriver::new(rusqlite::Connection::open_in_memory().unwrap())
    }

    #[test]
    fn query_returns_declared_types_and_raw_values() {
        let mut driver = driver();
        driver
            .execute_batch(
                "CREATE TABLE sensor (sensor_id INTEGER PRIMARY KEY, in_use BOOLEAN, reading DECIMAL(5,1));
                 INSERT INTO sensor (in_use, reading) VALUES (1, 71.5);",
            )
            .unwrap();

        let result = driver.query("SELECT * FROM sensor").unwrap();
        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.columns[1].decl_type.as_deref(), Some("BOOLEAN"));
        assert_eq!(result.rows, vec![vec![json!(1), json!(1), json!(71.5)]]);
    }

    #[test]
    fn unique_violation_is_classified_from_extended_code() {
        let mut driver = driver();
        driver
            .execute_batch("CREATE TABLE tag (name TEXT UNIQUE);")
            .unwrap();
        driver.execute("INSERT INTO tag (name) VALUES ('a')").unwrap();

        let err = driver
            .execute("INSERT INTO tag (name) VALUES ('a')")
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::UniqueViolation);
    }

    #[test]
    fn primary_key_violations_are_classified_as_unique() {
        let mut driver = driver();
        driver
            .execute_batch("CREATE TABLE code (code TEXT PRIMARY KEY) WITHOUT ROWID;")
            .unwrap();
        driver.execute("INSERT INTO code (code) VALUES ('a')").unwrap();

        let err = driver
            .execute("INSERT INTO code (code) VALUES ('a')")
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::UniqueViolation);
    }

    #[test]
    fn syntax_errors_are_generic_failures() {
        let mut driver = driver();
        let err = driver.query("SELEC 1").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Other);
    }

    #[test]
    fn escape_doubles_single_quotes() {
        assert_eq!(driver().escape("it's"), "it''s");
    }
}
