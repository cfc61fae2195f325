//! Persistence-context contract consumed by repositories.
//!
//! # Responsibility
//! - Define what a store must offer: tracked sets, lazy relationship loads,
//!   untracked queries and commit.
//! - Expose change tracking as a separately queried capability.
//!
//! # Invariants
//! - A context is a single unit of work; it is never shared between threads.
//! - `fetch` returns the tracked instance; `query` never tracks its results.
//!
//! # See also
//! - `sqlite::SqliteContext` for the bundled implementation.

pub mod sqlite;
mod tracker;

use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::{Entity, FieldAccess};
use crate::model::key::EntityKey;
use crate::repo::error::RepoResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::TypeId;

pub use sqlite::SqliteContext;
pub use tracker::EntitySet;

/// Lifecycle state of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Pending insert.
    Added,
    /// Matches the store.
    Unchanged,
    /// Scalar values were overwritten through `set_modified`.
    Modified,
    /// Pending delete.
    Deleted,
}

/// Address of one tracked entity, independent of its concrete type.
#[derive(Debug, Clone)]
pub struct EntryRef {
    pub entity: &'static EntityDescriptor,
    pub type_id: TypeId,
    pub key: EntityKey,
}

impl EntryRef {
    pub fn of<T: Entity>(key: EntityKey) -> Self {
        Self {
            entity: T::descriptor(),
            type_id: TypeId::of::<T>(),
            key,
        }
    }
}

/// Capability to overwrite a tracked entity with detached values.
pub trait ChangeTracking {
    /// Copies every scalar field of `updated` except the key onto the tracked
    /// entry and flags it as having pending changes.
    ///
    /// # Errors
    /// - `NotFound` when the entry is not tracked.
    /// - `UnknownField` when `updated` lacks a mapped field.
    fn set_modified(&mut self, entry: &EntryRef, updated: &dyn FieldAccess) -> RepoResult<()>;
}

/// Store operations a `Repository` is built on.
#[async_trait(?Send)]
pub trait PersistenceContext {
    /// Verifies that the store can hold `descriptor` and its relationships.
    fn ensure_mapped(&self, _descriptor: &'static EntityDescriptor) -> RepoResult<()> {
        Ok(())
    }

    /// Registers `entity` as pending insert.
    fn add<T: Entity>(&mut self, entity: &T) -> RepoResult<()>;

    /// Registers `entity` as pending delete.
    fn remove<T: Entity>(&mut self, entity: &T) -> RepoResult<()>;

    /// Returns the tracked entity for `key`, loading and tracking it on a miss.
    fn fetch<T: Entity>(&mut self, key: &EntityKey) -> RepoResult<Option<&mut T>>;

    /// Returns the tracked entity for `key` without touching the store.
    fn tracked_mut<T: Entity>(&mut self, key: &EntityKey) -> Option<&mut T>;

    /// Key lookup returning a copy of the tracked entity.
    fn find<T: Entity>(&mut self, key: &EntityKey) -> RepoResult<Option<T>> {
        Ok(self.fetch::<T>(key)?.map(|entity| entity.clone()))
    }

    async fn find_async<T: Entity>(&mut self, key: &EntityKey) -> RepoResult<Option<T>> {
        self.find::<T>(key)
    }

    /// Reads every stored `T` with `includes` materialized. Results are not tracked.
    fn query<T: Entity>(&mut self, includes: &[&str]) -> RepoResult<Vec<T>>;

    /// Materializes a single-reference relationship on a tracked entity.
    fn load_reference<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()>;

    /// Materializes a collection relationship on a tracked entity.
    fn load_collection<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()>;

    /// Commits every pending change and returns the number of rows written.
    fn save_changes(&mut self) -> RepoResult<usize>;

    async fn save_changes_async(&mut self) -> RepoResult<usize> {
        self.save_changes()
    }

    fn change_tracking(&mut self) -> Option<&mut dyn ChangeTracking> {
        None
    }

    /// Releases tracked state. Called once by the owning repository.
    fn dispose(&mut self) {}
}
