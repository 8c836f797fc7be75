//! Resource CRUD over a [`crate::db::Connection`].
//!
//! # Responsibility
//! - Compose escaping, statement building, converged merging and type
//!   coercion into read/create/update/delete of resource rows.
//!
//! # Invariants
//! - Writes re-read the stored row so callers observe store-side defaults.
//! - Demo mode never persists a write but returns the same shape of result.

pub mod crud;
