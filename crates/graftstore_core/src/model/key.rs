//! Entity identity and key resolution.
//!
//! # Responsibility
//! - Define the key value used by identity maps and relationship diffs.
//! - Resolve which value identifies an entity instance.
//!
//! # Invariants
//! - A designated key field always wins over the conventional integer id.
//! - `Integer(0)` on the conventional id field means "not yet assigned".

use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::{Entity, FieldAccess};
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Value identifying one entity within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Integer(i64),
    Text(String),
}

impl EntityKey {
    /// Converts a stored field value into a key.
    ///
    /// Returns `None` for `Null`, `Real` and `Blob` values.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Integer(value) => Some(Self::Integer(value)),
            Value::Text(value) => Some(Self::Text(value)),
            Value::Null | Value::Real(_) | Value::Blob(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Integer(value) => Value::Integer(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }

    /// Returns whether the key still waits for a store-generated value.
    pub fn is_unassigned(&self) -> bool {
        matches!(self, Self::Integer(0))
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for EntityKey {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl ToSql for EntityKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Integer(value) => value.to_sql(),
            Self::Text(value) => value.to_sql(),
        }
    }
}

/// Resolves the key identifying `entity`.
///
/// Uses the designated key field when the descriptor declares one, otherwise
/// the conventional integer id.
///
/// # Errors
/// - `InvalidKey` when the designated key holds `Null`, `Real` or `Blob`.
/// - `UnknownField` when the entity does not expose the designated field.
pub fn resolve_key<E: Entity>(entity: &E) -> RepoResult<EntityKey> {
    let descriptor = E::descriptor();
    match descriptor.key_field {
        Some(field) => key_from_field(descriptor, entity, field),
        None => Ok(EntityKey::Integer(entity.id())),
    }
}

/// Resolves the key of a type-erased entity through its descriptor.
pub fn resolve_key_erased(
    descriptor: &'static EntityDescriptor,
    entity: &dyn FieldAccess,
) -> RepoResult<EntityKey> {
    key_from_field(descriptor, entity, descriptor.key_column())
}

/// Returns whether two entities denote the same logical item.
pub fn same_identity<E: Entity>(left: &E, right: &E) -> RepoResult<bool> {
    Ok(resolve_key(left)? == resolve_key(right)?)
}

fn key_from_field(
    descriptor: &'static EntityDescriptor,
    entity: &dyn FieldAccess,
    field: &'static str,
) -> RepoResult<EntityKey> {
    let value = entity.field(field).ok_or_else(|| RepoError::UnknownField {
        entity: descriptor.name,
        field: field.to_string(),
    })?;
    EntityKey::from_value(value).ok_or(RepoError::InvalidKey {
        entity: descriptor.name,
        field,
    })
}
