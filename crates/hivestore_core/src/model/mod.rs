//! Resource descriptions and the converged-attribute model.
//!
//! # Responsibility
//! - Declare which table and soft columns back each resource type.
//! - Fold soft attributes into and out of the `converged` blob.
//!
//! # Invariants
//! - Descriptors are static data resolved by explicit lookup.

pub mod converged;
pub mod resource;
