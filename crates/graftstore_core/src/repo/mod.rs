//! Generic repository over a persistence context.
//!
//! # Responsibility
//! - Expose CRUD and commit operations for detached entities.
//! - Merge detached updates, including relationship collections, into
//!   tracked instances.
//!
//! # Invariants
//! - Updates never proceed without the persisted counterpart.
//! - Configuration problems surface at construction, not on first use.
//!
//! # See also
//! - `crate::context` for the store contract.

pub mod error;
pub mod loader;
pub mod reconcile;
pub mod repository;
