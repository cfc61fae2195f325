//! Generic repository for detached entities.
//!
//! # Responsibility
//! - Wrap a persistence context with CRUD, lookup and commit operations.
//! - Merge a detached entity into its tracked counterpart on update,
//!   reconciling requested relationship collections by identity.
//!
//! # Invariants
//! - Construction fails unless the context offers change tracking and the
//!   store can hold the entity mapping.
//! - `update` returns `NotFound` before touching any tracked state when the
//!   persisted counterpart is missing.
//! - Every operation after `dispose` fails with `Disposed`.
//!
//! # See also
//! - `crate::repo::reconcile` for the collection merge rules.

use crate::context::{EntryRef, PersistenceContext};
use crate::model::descriptor::RelationshipKind;
use crate::model::entity::Entity;
use crate::model::key::{resolve_key, EntityKey};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::loader::{ContextLoader, RelationshipLoader};
use crate::repo::reconcile::{reconcile_related, Reconciliation};
use log::debug;
use std::marker::PhantomData;

/// Repository for entities of type `T` over context `C`.
///
/// Owns its context for its whole lifetime and releases it on `dispose` or drop.
pub struct Repository<T: Entity, C: PersistenceContext, L: RelationshipLoader = ContextLoader> {
    context: Option<C>,
    loader: L,
    marker: PhantomData<fn() -> T>,
}

impl<T: Entity, C: PersistenceContext> Repository<T, C, ContextLoader> {
    /// Builds a repository that loads relationships through the context.
    ///
    /// # Errors
    /// - `MissingChangeTracking` when `context` cannot overwrite tracked entries.
    /// - `InvalidDescriptor`, `MissingTable`, `MissingColumn` for mapping problems.
    pub fn try_new(context: C) -> RepoResult<Self> {
        Self::try_with_loader(context, ContextLoader)
    }
}

impl<T: Entity, C: PersistenceContext, L: RelationshipLoader> Repository<T, C, L> {
    /// Builds a repository with an explicit relationship loading strategy.
    pub fn try_with_loader(mut context: C, loader: L) -> RepoResult<Self> {
        let descriptor = T::descriptor();
        descriptor.validate()?;
        if context.change_tracking().is_none() {
            return Err(RepoError::MissingChangeTracking);
        }
        context.ensure_mapped(descriptor)?;

        Ok(Self {
            context: Some(context),
            loader,
            marker: PhantomData,
        })
    }

    /// Every stored entity with `includes` eagerly loaded. Results are not tracked.
    pub fn all(&mut self, includes: &[&str]) -> RepoResult<Vec<T>> {
        self.context_mut()?.query::<T>(includes)
    }

    /// Stored entities matching `predicate`, with `includes` eagerly loaded.
    pub fn find_where<P>(&mut self, predicate: P, includes: &[&str]) -> RepoResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        let mut entities = self.all(includes)?;
        entities.retain(|entity| predicate(entity));
        Ok(entities)
    }

    /// Registers `entity` for insertion on the next save.
    pub fn create(&mut self, entity: T) -> RepoResult<T> {
        self.context_mut()?.add(&entity)?;
        debug!(
            "event=repo_create module=repo status=ok entity={}",
            T::descriptor().name
        );
        Ok(entity)
    }

    /// Merges the detached `entity` into its persisted counterpart.
    ///
    /// Relationship collections named in `includes` are loaded and then
    /// reconciled by identity against the members carried by `entity`.
    /// Scalar fields are copied through the context's change tracking.
    /// Relationships not named are left as stored.
    ///
    /// # Errors
    /// - `NotFound` when no entity with the same key is stored.
    /// - `UnknownRelationship` when an include is not declared.
    /// - `UnsupportedCollection` when a persisted collection cannot add/remove;
    ///   no collection is reconciled in that case.
    pub fn update(&mut self, entity: T, includes: &[&str]) -> RepoResult<T> {
        let descriptor = T::descriptor();
        let key = resolve_key(&entity)?;
        let context = self.context.as_mut().ok_or(RepoError::Disposed)?;

        if context.fetch::<T>(&key)?.is_none() {
            return Err(RepoError::NotFound {
                entity: descriptor.name,
                key,
            });
        }

        let mut collections = Vec::new();
        for name in includes {
            let relationship =
                descriptor
                    .relationship(name)
                    .ok_or_else(|| RepoError::UnknownRelationship {
                        entity: descriptor.name,
                        name: name.to_string(),
                    })?;
            if relationship.kind == RelationshipKind::Collection {
                collections.push(relationship.name);
            }
        }

        self.loader.load::<T, C>(context, &key, includes)?;

        let mut merged = Reconciliation::default();
        if !collections.is_empty() {
            let persisted = context
                .tracked_mut::<T>(&key)
                .ok_or_else(|| RepoError::NotFound {
                    entity: descriptor.name,
                    key: key.clone(),
                })?;
            // All or nothing: no collection is touched when one cannot change.
            for &name in &collections {
                let fixed = persisted
                    .related(name)
                    .is_some_and(|member| !member.supports_mutation());
                if fixed {
                    return Err(RepoError::UnsupportedCollection {
                        entity: descriptor.name,
                        name: name.to_string(),
                    });
                }
            }
            for name in collections {
                let unknown = || RepoError::UnknownRelationship {
                    entity: descriptor.name,
                    name: name.to_string(),
                };
                let incoming = entity.related(name).ok_or_else(unknown)?;
                let target = persisted.related_mut(name).ok_or_else(unknown)?;
                let outcome = reconcile_related(descriptor.name, name, target, incoming)?;
                merged.added += outcome.added;
                merged.removed += outcome.removed;
            }
        }

        context
            .change_tracking()
            .ok_or(RepoError::MissingChangeTracking)?
            .set_modified(&EntryRef::of::<T>(key.clone()), &entity)?;

        debug!(
            "event=repo_update module=repo status=ok entity={} key={} added={} removed={}",
            descriptor.name, key, merged.added, merged.removed
        );
        Ok(entity)
    }

    /// Looks up one entity by key, consulting tracked entities first.
    pub fn find(&mut self, key: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let key = key.into();
        self.context_mut()?.find::<T>(&key)
    }

    pub async fn find_async(&mut self, key: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let key = key.into();
        self.context_mut()?.find_async::<T>(&key).await
    }

    /// Registers `entity` for deletion on the next save.
    pub fn delete(&mut self, entity: T) -> RepoResult<T> {
        self.context_mut()?.remove(&entity)?;
        debug!(
            "event=repo_delete module=repo status=ok entity={}",
            T::descriptor().name
        );
        Ok(entity)
    }

    /// Commits pending changes and returns the number written.
    pub fn save_changes(&mut self) -> RepoResult<usize> {
        self.context_mut()?.save_changes()
    }

    pub async fn save_changes_async(&mut self) -> RepoResult<usize> {
        self.context_mut()?.save_changes_async().await
    }

    /// Releases the context. Calling it again has no effect.
    pub fn dispose(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.dispose();
            debug!(
                "event=repo_dispose module=repo status=ok entity={}",
                T::descriptor().name
            );
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.context.is_none()
    }

    pub fn context(&self) -> RepoResult<&C> {
        self.context.as_ref().ok_or(RepoError::Disposed)
    }

    pub fn context_mut(&mut self) -> RepoResult<&mut C> {
        self.context.as_mut().ok_or(RepoError::Disposed)
    }
}

impl<T: Entity, C: PersistenceContext, L: RelationshipLoader> Drop for Repository<T, C, L> {
    fn drop(&mut self) {
        self.dispose();
    }
}
