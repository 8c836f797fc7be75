//! Value escaping and identifier validation.
//!
//! # Invariants
//! - Identifiers reaching statement text match `[A-Za-z0-9_]+` and are
//!   wrapped in backticks.
//! - String values are always quoted with embedded quotes doubled.

use crate::db::{DbError, DbResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid identifier regex"));
static UNSIGNED_INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0|[1-9][0-9]*)$").expect("valid unsigned integer regex"));

/// Store-level escape of raw text: quotes doubled, nothing else added.
///
/// Intended for embedding inside caller-built fragments that supply their own
/// quoting.
pub fn escape_basic(raw: &str) -> String {
    raw.replace('\'', "''")
}

/// Renders a value as a statement literal.
///
/// - `null` becomes `null`, booleans become `1`/`0`.
/// - Integers and unsigned-integer strings within `i64` range pass through
///   unquoted. Wider values would be read back by SQLite as REAL.
/// - Arrays and objects are stored as their JSON text.
/// - Everything else is quoted.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(number) if number.is_i64() => number.to_string(),
        Value::Number(number) => quote(&number.to_string()),
        Value::String(text) if is_integer_literal(text) => text.clone(),
        Value::String(text) => quote(text),
        Value::Array(_) | Value::Object(_) => quote(&value.to_string()),
    }
}

/// Returns `true` when `name` is usable as a table or column name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Validates and quotes a table or column name.
pub fn escape_identifier(name: &str) -> DbResult<String> {
    if !is_valid_identifier(name) {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("`{name}`"))
}

/// Renders `` `schema`.`table` ``.
pub fn qualified_table(schema: &str, table: &str) -> DbResult<String> {
    Ok(format!(
        "{}.{}",
        escape_identifier(schema)?,
        escape_identifier(table)?
    ))
}

fn is_integer_literal(text: &str) -> bool {
    UNSIGNED_INTEGER_RE.is_match(text) && text.parse::<i64>().is_ok()
}

fn quote(text: &str) -> String {
    format!("'{}'", escape_basic(text))
}
