//! Type coercion of raw result values.
//!
//! SQLite hands back integers for boolean columns, collapses integral decimals
//! to integers and stores JSON as text. Column metadata is inspected once per
//! result set and the resulting plan is applied to every row.

use crate::db::driver::{ColumnMeta, ResultSet};
use crate::db::query::AttributeMap;
use crate::db::{DbError, DbResult};
use serde_json::{Number, Value};

/// Physical column holding the serialized converged attributes.
pub const CONVERGED_COLUMN: &str = "converged";

const JSON_COLUMN_PREFIX: &str = "json_";
const BOOLEAN_TYPES: &[&str] = &["BOOLEAN", "BOOL", "BIT", "BIT(1)", "TINYINT(1)"];
const DECIMAL_TYPE_PREFIXES: &[&str] = &["DECIMAL", "NUMERIC", "DEC"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    None,
    Boolean,
    Float,
    Json,
}

/// Chooses a coercion for one column.
pub fn coercion_for(column: &ColumnMeta) -> Coercion {
    let decl_type = column
        .decl_type
        .as_deref()
        .map(|value| value.trim().to_ascii_uppercase().replace(' ', ""))
        .unwrap_or_default();

    if decl_type == "JSON"
        || column.name == CONVERGED_COLUMN
        || column.name.starts_with(JSON_COLUMN_PREFIX)
    {
        return Coercion::Json;
    }
    if BOOLEAN_TYPES.contains(&decl_type.as_str()) {
        return Coercion::Boolean;
    }
    if DECIMAL_TYPE_PREFIXES
        .iter()
        .any(|prefix| decl_type.starts_with(prefix))
    {
        return Coercion::Float;
    }
    Coercion::None
}

/// Converts a raw result set into attribute-map rows.
pub fn coerce_rows(result: ResultSet) -> DbResult<Vec<AttributeMap>> {
    let plan: Vec<Coercion> = result.columns.iter().map(coercion_for).collect();
    let mut rows = Vec::with_capacity(result.rows.len());

    for values in result.rows {
        let mut row = AttributeMap::new();
        for ((column, coercion), value) in result.columns.iter().zip(&plan).zip(values) {
            row.insert(column.name.clone(), coerce_value(&column.name, *coercion, value)?);
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Rejects text bound for a JSON-bearing column that would not parse back.
///
/// Attributes without a matching column are left to the store to reject.
pub fn check_json_writes(columns: &[ColumnMeta], attributes: &AttributeMap) -> DbResult<()> {
    for column in columns {
        if coercion_for(column) != Coercion::Json {
            continue;
        }
        if let Some(Value::String(text)) = attributes.get(&column.name) {
            parse_json(&column.name, text)?;
        }
    }
    Ok(())
}

fn parse_json(column: &str, text: &str) -> DbResult<Value> {
    serde_json::from_str(text).map_err(|err| DbError::MalformedJson {
        column: column.to_string(),
        message: err.to_string(),
    })
}

fn coerce_value(column: &str, coercion: Coercion, value: Value) -> DbResult<Value> {
    if value.is_null() {
        return Ok(value);
    }

    let coerced = match (coercion, value) {
        (Coercion::Boolean, Value::Number(number)) => {
            Value::Bool(number.as_f64().is_some_and(|n| n != 0.0))
        }
        (Coercion::Boolean, Value::String(text)) => match text.trim() {
            "0" | "" => Value::Bool(false),
            "1" => Value::Bool(true),
            _ => Value::String(text),
        },
        (Coercion::Float, Value::Number(number)) => float_value(number.as_f64()),
        (Coercion::Float, Value::String(text)) => match text.trim().parse::<f64>() {
            Ok(parsed) => float_value(Some(parsed)),
            Err(_) => Value::String(text),
        },
        (Coercion::Json, Value::String(text)) => parse_json(column, &text)?,
        (_, value) => value,
    };

    Ok(coerced)
}

fn float_value(number: Option<f64>) -> Value {
    number
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}
