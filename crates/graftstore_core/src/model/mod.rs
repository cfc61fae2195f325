//! Entity mapping model.
//!
//! # Responsibility
//! - Describe how entity types map onto tables, keys and relationships.
//! - Give the store name-based access to scalar fields and relationship members.
//!
//! # Invariants
//! - Descriptors are static and validated before a repository accepts them.
//! - Keys compare by value; instances never compare by address.

pub mod descriptor;
pub mod entity;
pub mod key;
pub mod related;
