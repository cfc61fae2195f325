//! Per-type entity mapping metadata.
//!
//! # Responsibility
//! - Describe table, identity, scalar fields and relationships of one entity type.
//! - Validate that every name is safe to splice into SQL as an identifier.
//!
//! # Invariants
//! - `id_field` and `key_field` (when set) are listed in `fields`.
//! - Relationship names never collide with scalar field names.
//! - Descriptors are `'static` and built in const context.

use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Shape of a relationship member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// At most one related entity.
    Reference,
    /// Any number of related entities.
    Collection,
}

/// One named relationship persisted through a link table.
#[derive(Debug)]
pub struct RelationshipDescriptor {
    pub name: &'static str,
    pub kind: RelationshipKind,
    /// Descriptor of the related entity type.
    pub member: fn() -> &'static EntityDescriptor,
    pub link_table: &'static str,
    /// Link column holding the owner key.
    pub owner_column: &'static str,
    /// Link column holding the member key.
    pub member_column: &'static str,
}

impl RelationshipDescriptor {
    pub const fn collection(
        name: &'static str,
        member: fn() -> &'static EntityDescriptor,
        link_table: &'static str,
        owner_column: &'static str,
        member_column: &'static str,
    ) -> Self {
        Self {
            name,
            kind: RelationshipKind::Collection,
            member,
            link_table,
            owner_column,
            member_column,
        }
    }

    pub const fn reference(
        name: &'static str,
        member: fn() -> &'static EntityDescriptor,
        link_table: &'static str,
        owner_column: &'static str,
        member_column: &'static str,
    ) -> Self {
        Self {
            name,
            kind: RelationshipKind::Reference,
            member,
            link_table,
            owner_column,
            member_column,
        }
    }

    pub fn member_descriptor(&self) -> &'static EntityDescriptor {
        (self.member)()
    }
}

/// Mapping metadata for one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Table name, also used as the entity name in errors and logs.
    pub name: &'static str,
    /// Conventional integer identity field.
    pub id_field: &'static str,
    /// Field explicitly marked as the key; overrides `id_field` for lookups.
    pub key_field: Option<&'static str>,
    /// Scalar fields, in column order.
    pub fields: &'static [&'static str],
    pub relationships: &'static [RelationshipDescriptor],
}

impl EntityDescriptor {
    /// Starts a descriptor with the conventional `id` identity field.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            id_field: "id",
            key_field: None,
            fields: &[],
            relationships: &[],
        }
    }

    pub const fn with_id(self, id_field: &'static str) -> Self {
        Self { id_field, ..self }
    }

    /// Marks `field` as the designated key.
    pub const fn with_key(self, field: &'static str) -> Self {
        Self {
            key_field: Some(field),
            ..self
        }
    }

    pub const fn with_fields(self, fields: &'static [&'static str]) -> Self {
        Self { fields, ..self }
    }

    pub const fn with_relationships(self, relationships: &'static [RelationshipDescriptor]) -> Self {
        Self {
            relationships,
            ..self
        }
    }

    /// Column that identifies rows of this entity.
    pub fn key_column(&self) -> &'static str {
        self.key_field.unwrap_or(self.id_field)
    }

    /// Returns whether the store may generate the key on insert.
    pub fn has_generated_key(&self) -> bool {
        self.key_field.is_none()
    }

    pub fn relationship(&self, name: &str) -> Option<&'static RelationshipDescriptor> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name == name)
    }

    /// Scalar fields copied by `set_modified`: everything but the key column.
    pub fn value_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        let key = self.key_column();
        self.fields.iter().copied().filter(move |field| *field != key)
    }

    /// Checks the descriptor and the descriptors of its relationship members.
    ///
    /// # Errors
    /// - `InvalidDescriptor` naming the first violated rule.
    pub fn validate(&'static self) -> RepoResult<()> {
        self.validate_shape()?;
        for relationship in self.relationships {
            relationship.member_descriptor().validate_shape()?;
        }
        Ok(())
    }

    fn validate_shape(&'static self) -> RepoResult<()> {
        let invalid = |reason: String| RepoError::InvalidDescriptor {
            entity: self.name,
            reason,
        };

        ensure_identifier(self.name).map_err(invalid)?;
        if self.fields.is_empty() {
            return Err(invalid("at least one scalar field is required".to_string()));
        }

        let mut seen = BTreeSet::new();
        for field in self.fields {
            ensure_identifier(field).map_err(invalid)?;
            if !seen.insert(*field) {
                return Err(invalid(format!("field `{field}` is declared twice")));
            }
        }

        if !seen.contains(self.id_field) {
            return Err(invalid(format!(
                "id field `{}` is not a declared field",
                self.id_field
            )));
        }
        if let Some(key) = self.key_field {
            if !seen.contains(key) {
                return Err(invalid(format!("key field `{key}` is not a declared field")));
            }
        }

        for relationship in self.relationships {
            for identifier in [
                relationship.name,
                relationship.link_table,
                relationship.owner_column,
                relationship.member_column,
            ] {
                ensure_identifier(identifier).map_err(invalid)?;
            }
            if !seen.insert(relationship.name) {
                return Err(invalid(format!(
                    "relationship `{}` collides with another member",
                    relationship.name
                )));
            }
        }

        Ok(())
    }
}

fn ensure_identifier(value: &str) -> Result<(), String> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(format!("`{value}` is not a valid SQL identifier"))
    }
}
