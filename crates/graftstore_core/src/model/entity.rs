//! Entity capability traits.
//!
//! # Responsibility
//! - Define the minimal contract an entity type needs to be managed.
//! - Provide value conversion helpers for hand-written `FieldAccess` impls.
//!
//! # Invariants
//! - `FieldAccess` only covers scalar fields; relationships go through `Related`.
//! - `Entity::related*` must answer for every relationship in the descriptor.

use crate::model::descriptor::EntityDescriptor;
use crate::model::related::Related;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;

/// Scalar values of one row, in descriptor field order.
pub type Record = Vec<(&'static str, Value)>;

/// Anything exposing the conventional integer identity.
pub trait Identifiable {
    fn id(&self) -> i64;
}

/// Name-based access to scalar fields.
pub trait FieldAccess {
    /// Returns the current value, or `None` when the field does not exist.
    fn field(&self, name: &str) -> Option<Value>;

    /// Overwrites one field.
    ///
    /// # Errors
    /// - `UnknownField` when the field does not exist.
    /// - `InvalidData` when `value` has the wrong storage class.
    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()>;
}

/// Type that can be managed by a `Repository`.
pub trait Entity: Identifiable + FieldAccess + Clone + Default + 'static {
    fn descriptor() -> &'static EntityDescriptor;

    /// Returns the named relationship member.
    fn related(&self, _name: &str) -> Option<&dyn Related> {
        None
    }

    fn related_mut(&mut self, _name: &str) -> Option<&mut dyn Related> {
        None
    }
}

/// Builds a detached entity from one stored row.
pub fn hydrate<E: Entity>(record: Record) -> RepoResult<E> {
    let mut entity = E::default();
    for (field, value) in record {
        entity.set_field(field, value)?;
    }
    Ok(entity)
}

/// Reads the scalar values of `entity` in descriptor order.
pub fn snapshot_fields(
    descriptor: &'static EntityDescriptor,
    entity: &dyn FieldAccess,
) -> RepoResult<Record> {
    descriptor
        .fields
        .iter()
        .map(|field| {
            entity
                .field(field)
                .map(|value| (*field, value))
                .ok_or_else(|| RepoError::UnknownField {
                    entity: descriptor.name,
                    field: field.to_string(),
                })
        })
        .collect()
}

pub fn integer_field(entity: &'static str, field: &str, value: Value) -> RepoResult<i64> {
    match value {
        Value::Integer(value) => Ok(value),
        other => Err(mismatch(entity, field, "integer", &other)),
    }
}

pub fn text_field(entity: &'static str, field: &str, value: Value) -> RepoResult<String> {
    match value {
        Value::Text(value) => Ok(value),
        other => Err(mismatch(entity, field, "text", &other)),
    }
}

pub fn optional_text_field(
    entity: &'static str,
    field: &str,
    value: Value,
) -> RepoResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        other => text_field(entity, field, other).map(Some),
    }
}

pub fn real_field(entity: &'static str, field: &str, value: Value) -> RepoResult<f64> {
    match value {
        Value::Real(value) => Ok(value),
        Value::Integer(value) => Ok(value as f64),
        other => Err(mismatch(entity, field, "real", &other)),
    }
}

pub fn bool_field(entity: &'static str, field: &str, value: Value) -> RepoResult<bool> {
    match value {
        Value::Integer(0) => Ok(false),
        Value::Integer(1) => Ok(true),
        other => Err(mismatch(entity, field, "boolean (0/1)", &other)),
    }
}

pub fn bool_to_value(value: bool) -> Value {
    Value::Integer(if value { 1 } else { 0 })
}

fn mismatch(entity: &'static str, field: &str, expected: &str, actual: &Value) -> RepoError {
    RepoError::InvalidData(format!(
        "expected {expected} for `{entity}.{field}`, got {:?}",
        actual.data_type()
    ))
}
