//! Statement composition from attribute maps.
//!
//! # Responsibility
//! - Build predicate and assignment fragments for one column.
//! - Build complete SELECT/INSERT/UPDATE/DELETE statements.
//!
//! # Invariants
//! - Every identifier passes through [`escape_identifier`].
//! - Every value passes through [`escape`].
//! - Empty-array attributes never produce an `IN ()` clause.

use crate::db::escape::{escape, escape_identifier};
use crate::db::{DbError, DbResult};
use serde_json::{Map, Value};

/// Ordered column name to value mapping used for predicates and assignments.
pub type AttributeMap = Map<String, Value>;

const OPERATOR_KEY: &str = "operator";
const OPERATOR_VALUE_KEY: &str = "value";
const COMPARISON_OPERATORS: &[&str] = &[">", "<", "=", ">=", "<="];
const BETWEEN_OPERATOR: &str = "between";

/// Renders one WHERE fragment for `column`.
///
/// - `null` → `IS NULL`
/// - array → `IN (...)`; callers filter out empty arrays first
/// - `{"operator": op, "value": v}` → comparison or `BETWEEN`
/// - anything else → equality
pub fn predicate(column: &str, value: &Value) -> DbResult<String> {
    let column_sql = escape_identifier(column)?;

    match value {
        Value::Null => Ok(format!("{column_sql} IS NULL")),
        Value::Array(items) => {
            let list = items.iter().map(escape).collect::<Vec<_>>().join(", ");
            Ok(format!("{column_sql} IN ({list})"))
        }
        Value::Object(object) => match object.get(OPERATOR_KEY) {
            Some(operator) => operator_predicate(
                column,
                &column_sql,
                operator,
                object.get(OPERATOR_VALUE_KEY).unwrap_or(&Value::Null),
            ),
            None => Ok(format!("{column_sql} = {}", escape(value))),
        },
        _ => Ok(format!("{column_sql} = {}", escape(value))),
    }
}

fn operator_predicate(
    column: &str,
    column_sql: &str,
    operator: &Value,
    operand: &Value,
) -> DbResult<String> {
    let Value::String(operator) = operator else {
        return Err(DbError::InvalidOperator {
            column: column.to_string(),
            operator: operator.to_string(),
        });
    };
    let operator = operator.as_str();

    if operator == BETWEEN_OPERATOR {
        return match operand {
            Value::Array(bounds) if bounds.len() == 2 => Ok(format!(
                "{column_sql} BETWEEN {} AND {}",
                escape(&bounds[0]),
                escape(&bounds[1])
            )),
            _ => Err(DbError::InvalidPredicate {
                column: column.to_string(),
                message: "`between` requires a two-element value list".to_string(),
            }),
        };
    }

    if !COMPARISON_OPERATORS.contains(&operator) {
        return Err(DbError::InvalidOperator {
            column: column.to_string(),
            operator: operator.to_string(),
        });
    }

    if operand.is_null() || operand.is_array() || operand.is_object() {
        return Err(DbError::InvalidPredicate {
            column: column.to_string(),
            message: format!("operator `{operator}` requires a scalar value"),
        });
    }

    Ok(format!("{column_sql} {operator} {}", escape(operand)))
}

/// Renders `` `column` = value ``.
pub fn assignment(column: &str, value: &Value) -> DbResult<String> {
    Ok(format!("{} = {}", escape_identifier(column)?, escape(value)))
}

fn where_clause(attributes: &AttributeMap) -> DbResult<String> {
    let mut predicates = Vec::with_capacity(attributes.len());
    for (column, value) in attributes {
        if matches!(value, Value::Array(items) if items.is_empty()) {
            continue;
        }
        predicates.push(predicate(column, value)?);
    }

    if predicates.is_empty() {
        return Ok(String::new());
    }
    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}

/// Builds a SELECT over `table` (already qualified).
///
/// An empty `columns` slice selects every column.
pub fn select(table: &str, columns: &[&str], attributes: &AttributeMap) -> DbResult<String> {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|column| escape_identifier(column))
            .collect::<DbResult<Vec<_>>>()?
            .join(", ")
    };

    Ok(format!(
        "SELECT {projection} FROM {table}{}",
        where_clause(attributes)?
    ))
}

/// Builds a `SELECT COUNT(*)` with the same filtering as [`select`].
pub fn count(table: &str, attributes: &AttributeMap) -> DbResult<String> {
    Ok(format!(
        "SELECT COUNT(*) AS `count` FROM {table}{}",
        where_clause(attributes)?
    ))
}

/// Builds a statement returning the column set of `table` and no rows.
pub fn describe(table: &str) -> String {
    format!("SELECT * FROM {table} LIMIT 0")
}

/// Builds an INSERT; an empty map inserts a row of defaults.
pub fn insert(table: &str, attributes: &AttributeMap) -> DbResult<String> {
    if attributes.is_empty() {
        return Ok(format!("INSERT INTO {table} DEFAULT VALUES"));
    }

    let mut columns = Vec::with_capacity(attributes.len());
    let mut values = Vec::with_capacity(attributes.len());
    for (column, value) in attributes {
        columns.push(escape_identifier(column)?);
        values.push(escape(value));
    }

    Ok(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    ))
}

/// Builds an UPDATE of one row addressed by primary key.
pub fn update(table: &str, id_column: &str, id: i64, attributes: &AttributeMap) -> DbResult<String> {
    let assignments = attributes
        .iter()
        .map(|(column, value)| assignment(column, value))
        .collect::<DbResult<Vec<_>>>()?;

    Ok(format!(
        "UPDATE {table} SET {} WHERE {}",
        assignments.join(", "),
        predicate(id_column, &Value::from(id))?
    ))
}

/// Builds a DELETE of one row addressed by primary key.
pub fn delete(table: &str, id_column: &str, id: i64) -> DbResult<String> {
    Ok(format!(
        "DELETE FROM {table} WHERE {}",
        predicate(id_column, &Value::from(id))?
    ))
}

#[cfg(test)]
mod tests {
    use super::{assignment, count, delete, describe, insert, predicate, select, update, AttributeMap};
    use crate::db::DbError;
    use serde_json::json;

    fn attributes(value: serde_json::Value) -> AttributeMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn predicate_handles_null_list_and_equality() {
        assert_eq!(predicate("a", &json!(null)).unwrap(), "`a` IS NULL");
        assert_eq!(predicate("a", &json!([1, "x"])).unwrap(), "`a` IN (1, 'x')");
        assert_eq!(predicate("a", &json!("x")).unwrap(), "`a` = 'x'");
        assert_eq!(predicate("a", &json!(true)).unwrap(), "`a` = 1");
    }

    #[test]
    fn predicate_supports_comparison_operators() {
        for operator in [">", "<", "=", ">=", "<="] {
            let sql = predicate("t", &json!({"operator": operator, "value": 5})).unwrap();
            assert_eq!(sql, format!("`t` {operator} 5"));
        }
    }

    #[test]
    fn predicate_between_requires_two_bounds() {
        assert_eq!(
            predicate("t", &json!({"operator": "between", "value": [1, "9"]})).unwrap(),
            "`t` BETWEEN 1 AND 9"
        );

        let err = predicate("t", &json!({"operator": "between", "value": [1]})).unwrap_err();
        assert!(matches!(err, DbError::InvalidPredicate { .. }));
    }

    #[test]
    fn predicate_rejects_unknown_operators() {
        let err = predicate("t", &json!({"operator": "LIKE", "value": "%"})).unwrap_err();
        assert_eq!(
            err,
            DbError::InvalidOperator {
                column: "t".to_string(),
                operator: "LIKE".to_string()
            }
        );
    }

    #[test]
    fn object_without_operator_is_plain_equality() {
        assert_eq!(
            predicate("j", &json!({"a": 1})).unwrap(),
            r#"`j` = '{"a":1}'"#
        );
    }

    #[test]
    fn predicate_rejects_invalid_column() {
        assert!(matches!(
            predicate("a b", &json!(1)),
            Err(DbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn assignment_escapes_value() {
        assert_eq!(assignment("name", &json!("o'k")).unwrap(), "`name` = 'o''k'");
    }

    #[test]
    fn select_defaults_to_all_columns_and_skips_empty_lists() {
        let sql = select(
            "`main`.`thermostat`",
            &[],
            &attributes(json!({"user_id": 3, "thermostat_id": [], "inactive": false})),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `main`.`thermostat` WHERE `user_id` = 3 AND `inactive` = 0"
        );
        assert!(!sql.contains("IN ()"));
    }

    #[test]
    fn select_without_predicates_has_no_where() {
        let sql = select("`main`.`t`", &["a", "b"], &attributes(json!({"c": []}))).unwrap();
        assert_eq!(sql, "SELECT `a`, `b` FROM `main`.`t`");
    }

    #[test]
    fn count_shares_select_filtering() {
        let sql = count("`main`.`t`", &attributes(json!({"t_id": 4}))).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS `count` FROM `main`.`t` WHERE `t_id` = 4");
    }

    #[test]
    fn describe_selects_no_rows() {
        assert_eq!(describe("`main`.`t`"), "SELECT * FROM `main`.`t` LIMIT 0");
    }

    #[test]
    fn insert_lists_columns_in_map_order() {
        let sql = insert("`main`.`t`", &attributes(json!({"b": "x", "a": null}))).unwrap();
        assert_eq!(sql, "INSERT INTO `main`.`t` (`b`, `a`) VALUES ('x', null)");
        assert_eq!(
            insert("`main`.`t`", &AttributeMap::new()).unwrap(),
            "INSERT INTO `main`.`t` DEFAULT VALUES"
        );
    }

    #[test]
    fn update_and_delete_target_primary_key() {
        let sql = update("`main`.`t`", "t_id", 7, &attributes(json!({"name": "n"}))).unwrap();
        assert_eq!(sql, "UPDATE `main`.`t` SET `name` = 'n' WHERE `t_id` = 7");
        assert_eq!(
            delete("`main`.`t`", "t_id", 7).unwrap(),
            "DELETE FROM `main`.`t` WHERE `t_id` = 7"
        );
    }
}
