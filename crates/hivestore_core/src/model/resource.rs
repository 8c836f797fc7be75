//! Static resource descriptors.
//!
//! # Responsibility
//! - Describe the table and soft-column set of each resource type.
//! - Provide explicit name-based lookup for dispatch layers.
//!
//! # Invariants
//! - The primary key column is always `<table>_id`.
//! - Soft column names are valid identifiers, unique, and never `converged`
//!   or the primary key.

use crate::db::coerce::CONVERGED_COLUMN;
use crate::db::escape::is_valid_identifier;
use crate::db::{DbError, DbResult};
use std::collections::BTreeMap;

/// Primitive type a soft column value is coerced to before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedType {
    Integer,
    Float,
    Text,
}

impl ConvergedType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
        }
    }
}

/// One declared soft column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergedColumn {
    pub name: &'static str,
    pub kind: ConvergedType,
}

impl ConvergedColumn {
    pub const fn new(name: &'static str, kind: ConvergedType) -> Self {
        Self { name, kind }
    }
}

/// Build-time description of one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub table: &'static str,
    pub converged: &'static [ConvergedColumn],
}

impl ResourceDescriptor {
    pub const fn new(table: &'static str) -> Self {
        Self {
            table,
            converged: &[],
        }
    }

    pub const fn with_converged(table: &'static str, converged: &'static [ConvergedColumn]) -> Self {
        Self { table, converged }
    }

    /// Primary key column, `<table>_id`.
    pub fn id_column(&self) -> String {
        format!("{}_id", self.table)
    }

    pub fn has_converged(&self) -> bool {
        !self.converged.is_empty()
    }

    pub fn converged_column(&self, name: &str) -> Option<&ConvergedColumn> {
        self.converged.iter().find(|column| column.name == name)
    }

    /// Checks declaration-level invariants.
    ///
    /// Collisions with physical columns are only detectable against a real
    /// row and are reported at read time instead.
    pub fn validate(&self) -> DbResult<()> {
        if !is_valid_identifier(self.table) {
            return Err(DbError::InvalidIdentifier(self.table.to_string()));
        }

        let id_column = self.id_column();
        for (index, column) in self.converged.iter().enumerate() {
            if !is_valid_identifier(column.name) {
                return Err(DbError::InvalidIdentifier(column.name.to_string()));
            }
            if column.name == CONVERGED_COLUMN || column.name == id_column {
                return Err(self.invalid(format!(
                    "soft column `{}` shadows a reserved column",
                    column.name
                )));
            }
            if self.converged[..index]
                .iter()
                .any(|earlier| earlier.name == column.name)
            {
                return Err(self.invalid(format!(
                    "soft column `{}` is declared twice",
                    column.name
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, message: String) -> DbError {
        DbError::InvalidResource {
            table: self.table.to_string(),
            message,
        }
    }
}

/// Types backed by one table.
pub trait Resource {
    const DESCRIPTOR: ResourceDescriptor;
}

/// Name-based lookup of descriptors, for callers that dispatch on strings.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    descriptors: BTreeMap<&'static str, ResourceDescriptor>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor after validating it.
    pub fn register(&mut self, descriptor: ResourceDescriptor) -> DbResult<()> {
        descriptor.validate()?;
        if self.descriptors.contains_key(descriptor.table) {
            return Err(descriptor.invalid("resource is already registered".to_string()));
        }
        self.descriptors.insert(descriptor.table, descriptor);
        Ok(())
    }

    pub fn register_type<R: Resource>(&mut self) -> DbResult<()> {
        self.register(R::DESCRIPTOR)
    }

    pub fn get(&self, table: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(table)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }
}
