//! Converged attributes: soft columns stored in one serialized blob.
//!
//! # Responsibility
//! - Fold declared soft attributes into the `converged` column on write.
//! - Spread the blob back into first-class attributes on read.
//!
//! # Invariants
//! - Outgoing physical attribute maps never carry soft column keys.
//! - Returned rows never carry the `converged` key.
//! - A soft column colliding with a physical column is an error, never
//!   silently resolved.

use crate::db::coerce::CONVERGED_COLUMN;
use crate::db::query::AttributeMap;
use crate::db::{DbError, DbResult};
use crate::model::resource::{ConvergedType, ResourceDescriptor};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Primitive stored for one soft column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConvergedValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<ConvergedValue> for Value {
    fn from(value: ConvergedValue) -> Self {
        match value {
            ConvergedValue::Integer(number) => Value::from(number),
            ConvergedValue::Float(number) => Value::from(number),
            ConvergedValue::Text(text) => Value::String(text),
        }
    }
}

/// Decoded content of a `converged` column.
pub type ConvergedBlob = BTreeMap<String, ConvergedValue>;

/// Decodes a stored blob that has already been JSON-parsed by type coercion.
///
/// `null` or an empty string decode to an empty blob. Entries that are not
/// primitives are dropped.
pub fn decode_blob(value: &Value) -> DbResult<ConvergedBlob> {
    let object = match value {
        Value::Null => return Ok(ConvergedBlob::new()),
        Value::String(text) if text.trim().is_empty() => return Ok(ConvergedBlob::new()),
        Value::String(text) => {
            serde_json::from_str::<Value>(text).map_err(|err| DbError::MalformedJson {
                column: CONVERGED_COLUMN.to_string(),
                message: err.to_string(),
            })?
        }
        other => other.clone(),
    };

    let Value::Object(entries) = object else {
        return Err(DbError::MalformedJson {
            column: CONVERGED_COLUMN.to_string(),
            message: "expected a JSON object".to_string(),
        });
    };

    let mut blob = ConvergedBlob::new();
    for (key, entry) in entries {
        match serde_json::from_value::<ConvergedValue>(entry) {
            Ok(decoded) => {
                blob.insert(key, decoded);
            }
            Err(_) => warn!(
                "event=converged_decode module=model status=skipped reason=non_primitive key_len={}",
                key.len()
            ),
        }
    }
    Ok(blob)
}

/// Folds soft attributes from `attributes` into `baseline` and stores the
/// result as the `converged` attribute.
///
/// With `always_write == false` the blob is only written when at least one
/// soft attribute is present. Returns whether the `converged` attribute was set.
pub fn merge_for_write(
    descriptor: &ResourceDescriptor,
    mut baseline: ConvergedBlob,
    attributes: &mut AttributeMap,
    always_write: bool,
) -> DbResult<bool> {
    if !descriptor.has_converged() {
        return Ok(false);
    }

    let mut touched = false;
    let mut physical = AttributeMap::new();
    for (key, value) in std::mem::take(attributes) {
        let Some(column) = descriptor.converged_column(&key) else {
            physical.insert(key, value);
            continue;
        };

        touched = true;
        if value.is_null() {
            baseline.remove(&key);
        } else {
            let coerced = coerce(column.name, column.kind, &value)?;
            baseline.insert(key, coerced);
        }
    }
    *attributes = physical;

    if !touched && !always_write {
        return Ok(false);
    }

    let encoded = serde_json::to_string(&baseline).map_err(|err| DbError::MalformedJson {
        column: CONVERGED_COLUMN.to_string(),
        message: err.to_string(),
    })?;
    attributes.insert(CONVERGED_COLUMN.to_string(), Value::String(encoded));
    Ok(true)
}

/// Replaces the `converged` attribute of a coerced row with one first-class
/// attribute per declared soft column.
pub fn expand_row(descriptor: &ResourceDescriptor, row: AttributeMap) -> DbResult<AttributeMap> {
    let mut expanded = AttributeMap::with_capacity(row.len() + descriptor.converged.len());
    let mut stored = None;
    for (key, value) in row {
        if key == CONVERGED_COLUMN {
            stored = Some(value);
        } else {
            expanded.insert(key, value);
        }
    }

    if !descriptor.has_converged() {
        return Ok(expanded);
    }

    for column in descriptor.converged {
        if expanded.contains_key(column.name) {
            return Err(DbError::ConvergedColumnCollision {
                table: descriptor.table.to_string(),
                column: column.name.to_string(),
            });
        }
    }

    let Some(stored) = stored else {
        return Ok(expanded);
    };
    let mut blob = decode_blob(&stored)?;
    for column in descriptor.converged {
        let value = blob.remove(column.name).map_or(Value::Null, Value::from);
        expanded.insert(column.name.to_string(), value);
    }
    Ok(expanded)
}

fn coerce(column: &str, kind: ConvergedType, value: &Value) -> DbResult<ConvergedValue> {
    let mismatch = || DbError::ConvergedTypeMismatch {
        column: column.to_string(),
        expected: kind.as_str(),
    };

    match kind {
        ConvergedType::Integer => match value {
            Value::Bool(flag) => Ok(ConvergedValue::Integer(i64::from(*flag))),
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    return Ok(ConvergedValue::Integer(integer));
                }
                number
                    .as_f64()
                    .filter(|float| float.is_finite() && float.abs() < i64::MAX as f64)
                    .map(|float| ConvergedValue::Integer(float.trunc() as i64))
                    .ok_or_else(mismatch)
            }
            Value::String(text) => {
                let trimmed = text.trim();
                if let Ok(integer) = trimmed.parse::<i64>() {
                    return Ok(ConvergedValue::Integer(integer));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|float| float.is_finite() && float.abs() < i64::MAX as f64)
                    .map(|float| ConvergedValue::Integer(float.trunc() as i64))
                    .ok_or_else(mismatch)
            }
            _ => Err(mismatch()),
        },
        ConvergedType::Float => {
            let float = match value {
                Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            float
                .filter(|float| float.is_finite())
                .map(ConvergedValue::Float)
                .ok_or_else(mismatch)
        }
        ConvergedType::Text => match value {
            Value::String(text) => Ok(ConvergedValue::Text(text.clone())),
            Value::Number(number) => Ok(ConvergedValue::Text(number.to_string())),
            Value::Bool(flag) => Ok(ConvergedValue::Text(u8::from(*flag).to_string())),
            _ => Err(mismatch()),
        },
    }
}
