//! CRUD operations for resources described by a [`ResourceDescriptor`].

use crate::db::coerce::{self, CONVERGED_COLUMN};
use crate::db::driver::Driver;
use crate::db::escape::qualified_table;
use crate::db::query::{self, AttributeMap};
use crate::db::{Connection, DbError, DbResult};
use crate::model::converged::{decode_blob, expand_row, merge_for_write, ConvergedBlob};
use crate::model::resource::ResourceDescriptor;
use log::info;
use serde_json::Value;

impl<D: Driver> Connection<D> {
    /// Reads every row of `resource` matching `attributes`.
    ///
    /// An empty `columns` slice selects every column. Attributes bound to an
    /// empty list are ignored.
    pub fn read(
        &mut self,
        resource: &ResourceDescriptor,
        attributes: &AttributeMap,
        columns: &[&str],
    ) -> DbResult<Vec<AttributeMap>> {
        let table = self.table_sql(resource)?;
        let sql = query::select(&table, columns, attributes)?;
        self.query_rows(&sql)?
            .into_iter()
            .map(|row| expand_row(resource, row))
            .collect()
    }

    /// Reads one row by primary key.
    pub fn read_id(&mut self, resource: &ResourceDescriptor, id: i64) -> DbResult<Option<AttributeMap>> {
        let filter = id_filter(resource, id);
        Ok(self.read(resource, &filter, &[])?.into_iter().next())
    }

    /// Inserts a row and returns it as stored.
    ///
    /// The row is re-read through `last_insert_rowid`, so the primary key must
    /// be the table's `INTEGER PRIMARY KEY`.
    pub fn create(
        &mut self,
        resource: &ResourceDescriptor,
        mut attributes: AttributeMap,
    ) -> DbResult<AttributeMap> {
        let table = self.table_sql(resource)?;
        merge_for_write(resource, ConvergedBlob::new(), &mut attributes, true)?;
        self.validate_json_columns(&table, &attributes)?;
        let sql = query::insert(&table, &attributes)?;

        if self.is_read_only() {
            info!(
                "event=db_create module=repo status=skipped reason=read_only table={}",
                resource.table
            );
            return self.simulated_row(resource, &table, attributes);
        }

        self.execute_write(&sql)?;
        let id = self.last_insert_id();
        self.read_id(resource, id)?
            .ok_or_else(|| row_not_found(resource, id))
    }

    /// Updates the row addressed by the `<table>_id` attribute and returns it
    /// as stored.
    pub fn update(
        &mut self,
        resource: &ResourceDescriptor,
        attributes: AttributeMap,
    ) -> DbResult<AttributeMap> {
        let table = self.table_sql(resource)?;
        let id_column = resource.id_column();
        let (id_value, mut attributes) = take_attribute(attributes, &id_column);
        let Some(id_value) = id_value else {
            return Err(DbError::MissingIdentifier {
                table: resource.table.to_string(),
            });
        };
        let id = parse_id(&id_column, &id_value)?;
        if attributes.is_empty() {
            return Err(DbError::EmptyUpdate {
                table: resource.table.to_string(),
            });
        }

        let touches_converged = attributes
            .keys()
            .any(|key| resource.converged_column(key).is_some());
        let baseline = if touches_converged {
            self.stored_blob(resource, &table, id)?
        } else {
            ConvergedBlob::new()
        };
        merge_for_write(resource, baseline, &mut attributes, false)?;
        self.validate_json_columns(&table, &attributes)?;
        let sql = query::update(&table, &id_column, id, &attributes)?;

        if self.is_read_only() {
            info!(
                "event=db_update module=repo status=skipped reason=read_only table={}",
                resource.table
            );
            return self
                .read_id(resource, id)?
                .ok_or_else(|| row_not_found(resource, id));
        }

        if self.execute_write(&sql)? == 0 {
            return Err(row_not_found(resource, id));
        }
        self.read_id(resource, id)?
            .ok_or_else(|| row_not_found(resource, id))
    }

    /// Deletes the row with primary key `id` and returns the number of rows
    /// removed. Deleting a missing row is not an error.
    pub fn delete(&mut self, resource: &ResourceDescriptor, id: i64) -> DbResult<u64> {
        let table = self.table_sql(resource)?;
        let id_column = resource.id_column();
        let sql = query::delete(&table, &id_column, id)?;

        if self.is_read_only() {
            info!(
                "event=db_delete module=repo status=skipped reason=read_only table={}",
                resource.table
            );
            let count_sql = query::count(&table, &id_filter(resource, id))?;
            let rows = self.query_rows(&count_sql)?;
            return Ok(rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0));
        }

        self.execute_write(&sql)
    }

    fn table_sql(&self, resource: &ResourceDescriptor) -> DbResult<String> {
        resource.validate()?;
        qualified_table(self.schema(), resource.table)
    }

    /// Text written to a JSON-bearing column must parse, or every later read
    /// of the row would fail.
    fn validate_json_columns(&mut self, table: &str, attributes: &AttributeMap) -> DbResult<()> {
        if !attributes.values().any(Value::is_string) {
            return Ok(());
        }
        let columns = self.describe_columns(table)?;
        coerce::check_json_writes(&columns, attributes)
    }

    fn stored_blob(
        &mut self,
        resource: &ResourceDescriptor,
        table: &str,
        id: i64,
    ) -> DbResult<ConvergedBlob> {
        let sql = query::select(table, &[CONVERGED_COLUMN], &id_filter(resource, id))?;
        match self.query_rows(&sql)?.first() {
            Some(row) => decode_blob(row.get(CONVERGED_COLUMN).unwrap_or(&Value::Null)),
            None => Ok(ConvergedBlob::new()),
        }
    }

    /// Builds the row a real insert would have returned: every column of the
    /// table, the primary key unset, overlaid with the written attributes.
    fn simulated_row(
        &mut self,
        resource: &ResourceDescriptor,
        table: &str,
        attributes: AttributeMap,
    ) -> DbResult<AttributeMap> {
        let mut row = AttributeMap::new();
        for column in self.describe_columns(table)? {
            row.insert(column.name, Value::Null);
        }
        for (key, value) in attributes {
            row.insert(key, value);
        }
        expand_row(resource, row)
    }
}

fn id_filter(resource: &ResourceDescriptor, id: i64) -> AttributeMap {
    let mut filter = AttributeMap::new();
    filter.insert(resource.id_column(), Value::from(id));
    filter
}

fn row_not_found(resource: &ResourceDescriptor, id: i64) -> DbError {
    DbError::RowNotFound {
        table: resource.table.to_string(),
        id,
    }
}

/// Removes `key` while keeping the order of the remaining attributes.
fn take_attribute(attributes: AttributeMap, key: &str) -> (Option<Value>, AttributeMap) {
    let mut taken = None;
    let mut rest = AttributeMap::with_capacity(attributes.len());
    for (name, value) in attributes {
        if name == key {
            taken = Some(value);
        } else {
            rest.insert(name, value);
        }
    }
    (taken, rest)
}

fn parse_id(id_column: &str, value: &Value) -> DbResult<i64> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DbError::InvalidPredicate {
        column: id_column.to_string(),
        message: "primary key must be an integer".to_string(),
    })
}
