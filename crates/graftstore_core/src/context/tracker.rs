//! Identity map and entry-state bookkeeping for one entity type.
//!
//! # Responsibility
//! - Hold tracked instances with their lifecycle state and dirty fields.
//! - Remember which relationships were loaded and the member keys seen then.
//!
//! # Invariants
//! - At most one non-deleted entry per assigned key.
//! - `set_modified` never touches the key column or relationship members.
//! - Entry keys are cached at track time; callers must not rewrite key fields
//!   on tracked instances.

use crate::context::EntryState;
use crate::model::entity::{Entity, FieldAccess};
use crate::model::key::{resolve_key, EntityKey};
use crate::repo::error::{RepoError, RepoResult};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub(crate) struct EntityEntry<T> {
    pub(crate) key: EntityKey,
    pub(crate) entity: T,
    pub(crate) state: EntryState,
    pub(crate) modified: BTreeSet<&'static str>,
    /// Member keys per loaded relationship, as last written to or read from the store.
    pub(crate) loaded: BTreeMap<&'static str, Vec<EntityKey>>,
}

impl<T> EntityEntry<T> {
    fn new(key: EntityKey, entity: T, state: EntryState) -> Self {
        Self {
            key,
            entity,
            state,
            modified: BTreeSet::new(),
            loaded: BTreeMap::new(),
        }
    }

    fn is_live(&self) -> bool {
        self.state != EntryState::Deleted
    }
}

/// Tracked entities of one type, in tracking order.
#[derive(Debug)]
pub struct EntitySet<T> {
    entries: Vec<EntityEntry<T>>,
}

impl<T> Default for EntitySet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Entity> EntitySet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, deleted ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&T> {
        self.live(key).map(|entry| &entry.entity)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut T> {
        self.live_mut(key).map(|entry| &mut entry.entity)
    }

    /// State of the live entry for `key`, else of a pending delete.
    pub fn state(&self, key: &EntityKey) -> Option<EntryState> {
        self.live(key)
            .or_else(|| self.entries.iter().find(|entry| entry.key == *key))
            .map(|entry| entry.state)
    }

    /// Fields overwritten with a different value since the last commit.
    pub fn modified_fields(&self, key: &EntityKey) -> Vec<&'static str> {
        self.live(key)
            .map(|entry| entry.modified.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, key: &EntityKey, relationship: &str) -> bool {
        self.live(key)
            .is_some_and(|entry| entry.loaded.contains_key(relationship))
    }

    pub(crate) fn track_added(&mut self, entity: T) -> RepoResult<()> {
        let key = resolve_key(&entity)?;
        if !key.is_unassigned() && self.live(&key).is_some() {
            return Err(RepoError::AlreadyTracked {
                entity: T::descriptor().name,
                key,
            });
        }
        self.entries
            .push(EntityEntry::new(key, entity, EntryState::Added));
        Ok(())
    }

    pub(crate) fn track_unchanged(&mut self, key: EntityKey, entity: T) -> &mut T {
        self.entries
            .push(EntityEntry::new(key, entity, EntryState::Unchanged));
        let index = self.entries.len() - 1;
        &mut self.entries[index].entity
    }

    /// Marks the entity for deletion; a pending insert is simply dropped.
    pub(crate) fn mark_deleted(&mut self, entity: &T) -> RepoResult<()> {
        let key = resolve_key(entity)?;
        match self.entries.iter().position(|entry| entry.is_live() && entry.key == key) {
            Some(index) if self.entries[index].state == EntryState::Added => {
                self.entries.remove(index);
            }
            Some(index) => self.entries[index].state = EntryState::Deleted,
            None => self.entries.push(EntityEntry::new(
                key,
                entity.clone(),
                EntryState::Deleted,
            )),
        }
        Ok(())
    }

    pub(crate) fn set_modified(
        &mut self,
        key: &EntityKey,
        updated: &dyn FieldAccess,
    ) -> RepoResult<()> {
        let descriptor = T::descriptor();
        let entry = self.live_mut(key).ok_or_else(|| RepoError::NotFound {
            entity: descriptor.name,
            key: key.clone(),
        })?;

        for field in descriptor.value_fields() {
            let value = updated.field(field).ok_or_else(|| RepoError::UnknownField {
                entity: descriptor.name,
                field: field.to_string(),
            })?;
            if entry.entity.field(field).as_ref() != Some(&value) {
                entry.entity.set_field(field, value)?;
                entry.modified.insert(field);
            }
        }

        if entry.state == EntryState::Unchanged {
            entry.state = EntryState::Modified;
        }
        Ok(())
    }

    pub(crate) fn mark_loaded(
        &mut self,
        key: &EntityKey,
        relationship: &'static str,
        member_keys: Vec<EntityKey>,
    ) {
        if let Some(entry) = self.live_mut(key) {
            entry.loaded.insert(relationship, member_keys);
        }
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut EntityEntry<T>> {
        self.entries.iter_mut()
    }

    /// Settles states after a successful commit.
    pub(crate) fn accept_changes(&mut self) {
        self.entries.retain(EntityEntry::is_live);
        for entry in &mut self.entries {
            entry.state = EntryState::Unchanged;
            entry.modified.clear();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    fn live(&self, key: &EntityKey) -> Option<&EntityEntry<T>> {
        self.entries
            .iter()
            .find(|entry| entry.is_live() && entry.key == *key)
    }

    fn live_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry<T>> {
        self.entries
            .iter_mut()
            .find(|entry| entry.is_live() && entry.key == *key)
    }
}
