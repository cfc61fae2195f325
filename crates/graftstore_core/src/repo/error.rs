//! Repository error taxonomy.
//!
//! # Invariants
//! - Store failures keep their original `rusqlite::Error` as `source()`.
//! - Configuration errors are detected at construction or at the first
//!   offending call and are never retried.

use crate::db::DbError;
use crate::model::key::EntityKey;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by repositories and persistence contexts.
#[derive(Debug)]
pub enum RepoError {
    /// The bound context does not offer the `set_modified` capability.
    MissingChangeTracking,
    /// Entity descriptor is malformed.
    InvalidDescriptor {
        entity: &'static str,
        reason: String,
    },
    /// Relationship name is not declared by the entity descriptor.
    UnknownRelationship { entity: &'static str, name: String },
    /// Persisted relationship member cannot be reconciled in place.
    UnsupportedCollection { entity: &'static str, name: String },
    /// Scalar field is not exposed by the entity.
    UnknownField { entity: &'static str, field: String },
    /// Designated key holds a value that cannot identify an entity.
    InvalidKey {
        entity: &'static str,
        field: &'static str,
    },
    /// Mapped table does not exist in the store.
    MissingTable(&'static str),
    /// Mapped column does not exist in the store.
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    /// No persisted entity matches the key.
    NotFound {
        entity: &'static str,
        key: EntityKey,
    },
    /// An entity with the same key is already tracked by the context.
    AlreadyTracked {
        entity: &'static str,
        key: EntityKey,
    },
    /// Repository was used after `dispose`.
    Disposed,
    /// Persisted row cannot be converted into the entity shape.
    InvalidData(String),
    /// Underlying store failure, propagated unchanged.
    Db(DbError),
}

impl RepoError {
    /// Returns whether this error signals a mapping or wiring problem rather
    /// than a per-call failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingChangeTracking
                | Self::InvalidDescriptor { .. }
                | Self::UnknownRelationship { .. }
                | Self::UnsupportedCollection { .. }
                | Self::UnknownField { .. }
                | Self::InvalidKey { .. }
                | Self::MissingTable(_)
                | Self::MissingColumn { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingChangeTracking => write!(
                f,
                "persistence context does not support change tracking (set_modified)"
            ),
            Self::InvalidDescriptor { entity, reason } => {
                write!(f, "invalid descriptor for `{entity}`: {reason}")
            }
            Self::UnknownRelationship { entity, name } => {
                write!(f, "`{entity}` has no relationship named `{name}`")
            }
            Self::UnsupportedCollection { entity, name } => write!(
                f,
                "`{entity}.{name}` must support both add and remove to be reconciled"
            ),
            Self::UnknownField { entity, field } => {
                write!(f, "`{entity}` has no scalar field named `{field}`")
            }
            Self::InvalidKey { entity, field } => write!(
                f,
                "key field `{entity}.{field}` holds a value that cannot identify an entity"
            ),
            Self::MissingTable(table) => write!(f, "mapped table `{table}` does not exist"),
            Self::MissingColumn { table, column } => {
                write!(f, "mapped column `{column}` does not exist in table `{table}`")
            }
            Self::NotFound { entity, key } => {
                write!(f, "`{entity}` with key {key} could not be found")
            }
            Self::AlreadyTracked { entity, key } => {
                write!(f, "`{entity}` with key {key} is already tracked")
            }
            Self::Disposed => write!(f, "repository has been disposed"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
