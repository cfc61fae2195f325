//! Relationship loading strategies.

use crate::context::PersistenceContext;
use crate::model::descriptor::RelationshipKind;
use crate::model::entity::Entity;
use crate::model::key::EntityKey;
use crate::repo::error::{RepoError, RepoResult};

/// Materializes named relationships on a tracked entity.
pub trait RelationshipLoader {
    /// Loads every relationship in `names` onto the entity tracked under `key`.
    ///
    /// # Errors
    /// - `UnknownRelationship` when a name is not declared by `T`.
    fn load<T: Entity, C: PersistenceContext>(
        &self,
        context: &mut C,
        key: &EntityKey,
        names: &[&str],
    ) -> RepoResult<()>;
}

/// Dispatches each name to the context's reference or collection primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLoader;

impl RelationshipLoader for ContextLoader {
    fn load<T: Entity, C: PersistenceContext>(
        &self,
        context: &mut C,
        key: &EntityKey,
        names: &[&str],
    ) -> RepoResult<()> {
        let descriptor = T::descriptor();
        for name in names {
            let relationship =
                descriptor
                    .relationship(name)
                    .ok_or_else(|| RepoError::UnknownRelationship {
                        entity: descriptor.name,
                        name: name.to_string(),
                    })?;
            match relationship.kind {
                RelationshipKind::Reference => context.load_reference::<T>(key, name)?,
                RelationshipKind::Collection => context.load_collection::<T>(key, name)?,
            }
        }
        Ok(())
    }
}

/// Leaves relationships untouched. Useful when tests seed members directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoader;

impl RelationshipLoader for NoopLoader {
    fn load<T: Entity, C: PersistenceContext>(
        &self,
        _context: &mut C,
        _key: &EntityKey,
        _names: &[&str],
    ) -> RepoResult<()> {
        Ok(())
    }
}
