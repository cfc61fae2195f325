//! SQLite-backed persistence context.
//!
//! # Responsibility
//! - Track entities per type in an identity map and commit them as one unit.
//! - Load relationship members through descriptor-declared link tables.
//! - Offer the `ChangeTracking` capability used by repository updates.
//!
//! # Invariants
//! - `save_changes` writes inside a single `IMMEDIATE` transaction, phases
//!   insert, update, delete.
//! - Untracked queries read committed rows only.
//! - After a failed commit the tracked state no longer matches the store;
//!   the context should be discarded.
//!
//! # See also
//! - `statements` for generated SQL and schema checks.

mod flush;
mod statements;

use crate::context::tracker::EntitySet;
use crate::context::{ChangeTracking, EntryRef, EntryState, PersistenceContext};
use crate::db::{open_db, open_db_in_memory, open_db_with, ConnectionOptions};
use crate::model::descriptor::{EntityDescriptor, RelationshipDescriptor, RelationshipKind};
use crate::model::entity::{hydrate, Entity, FieldAccess};
use crate::model::key::{resolve_key, EntityKey};
use crate::repo::error::{RepoError, RepoResult};
use async_trait::async_trait;
use flush::{ErasedSet, FlushPhase};
use log::{debug, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::any::TypeId;
use std::path::Path;
use std::time::Instant;

struct TrackedSet {
    type_id: TypeId,
    set: Box<dyn ErasedSet>,
}

/// Unit of work over one SQLite connection.
pub struct SqliteContext {
    conn: Connection,
    sets: Vec<TrackedSet>,
}

impl SqliteContext {
    /// Wraps an already configured connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            sets: Vec::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_with(path: impl AsRef<Path>, options: &ConnectionOptions) -> RepoResult<Self> {
        Ok(Self::new(open_db_with(path, options)?))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Underlying connection, e.g. for schema setup.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Live tracked instance for `key`, if any.
    pub fn tracked<T: Entity>(&self, key: &EntityKey) -> Option<&T> {
        self.set::<T>()?.get(key)
    }

    pub fn entry_state<T: Entity>(&self, key: &EntityKey) -> Option<EntryState> {
        self.set::<T>()?.state(key)
    }

    pub fn modified_fields<T: Entity>(&self, key: &EntityKey) -> Vec<&'static str> {
        self.set::<T>()
            .map(|set| set.modified_fields(key))
            .unwrap_or_default()
    }

    pub fn is_loaded<T: Entity>(&self, key: &EntityKey, relationship: &str) -> bool {
        self.set::<T>()
            .is_some_and(|set| set.is_loaded(key, relationship))
    }

    /// Number of tracked entries across all entity types.
    pub fn tracked_count(&self) -> usize {
        self.sets.iter().map(|tracked| tracked.set.len()).sum()
    }

    fn set<T: Entity>(&self) -> Option<&EntitySet<T>> {
        let type_id = TypeId::of::<T>();
        self.sets
            .iter()
            .find(|tracked| tracked.type_id == type_id)
            .and_then(|tracked| tracked.set.as_any().downcast_ref::<EntitySet<T>>())
    }

    fn existing_set_mut<T: Entity>(&mut self) -> Option<&mut EntitySet<T>> {
        let type_id = TypeId::of::<T>();
        self.sets
            .iter_mut()
            .find(|tracked| tracked.type_id == type_id)
            .and_then(|tracked| tracked.set.as_any_mut().downcast_mut::<EntitySet<T>>())
    }

    fn set_mut<T: Entity>(&mut self) -> RepoResult<&mut EntitySet<T>> {
        let type_id = TypeId::of::<T>();
        let index = match self.sets.iter().position(|tracked| tracked.type_id == type_id) {
            Some(index) => index,
            None => {
                self.sets.push(TrackedSet {
                    type_id,
                    set: Box::new(EntitySet::<T>::new()),
                });
                self.sets.len() - 1
            }
        };
        self.sets[index]
            .set
            .as_any_mut()
            .downcast_mut::<EntitySet<T>>()
            .ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "entity set for `{}` holds another type",
                    T::descriptor().name
                ))
            })
    }

    fn load_related<T: Entity>(
        &mut self,
        key: &EntityKey,
        name: &str,
        kind: RelationshipKind,
    ) -> RepoResult<()> {
        let descriptor = T::descriptor();
        let relationship = relationship_of(descriptor, name)?;
        if relationship.kind != kind {
            return Err(RepoError::InvalidDescriptor {
                entity: descriptor.name,
                reason: format!("relationship `{name}` is not a {}", kind_label(kind)),
            });
        }

        match self.set::<T>() {
            Some(set) if set.is_loaded(key, relationship.name) => return Ok(()),
            Some(set) if set.get(key).is_some() => {}
            _ => return Err(untracked(descriptor, key)),
        }

        let records = statements::select_members(&self.conn, relationship, key)?;
        let member_descriptor = relationship.member_descriptor();
        let stored_keys = records
            .iter()
            .map(|record| statements::record_key(member_descriptor, record))
            .collect::<RepoResult<Vec<_>>>()?;

        let set = self.set_mut::<T>()?;
        let entity = set
            .get_mut(key)
            .ok_or_else(|| untracked(descriptor, key))?;
        let member = entity
            .related_mut(relationship.name)
            .ok_or_else(|| unknown_relationship(descriptor, relationship.name))?;
        member.materialize(records)?;
        set.mark_loaded(key, relationship.name, stored_keys);
        Ok(())
    }
}

#[async_trait(?Send)]
impl PersistenceContext for SqliteContext {
    fn ensure_mapped(&self, descriptor: &'static EntityDescriptor) -> RepoResult<()> {
        statements::ensure_mapped(&self.conn, descriptor)
    }

    fn add<T: Entity>(&mut self, entity: &T) -> RepoResult<()> {
        self.set_mut::<T>()?.track_added(entity.clone())
    }

    fn remove<T: Entity>(&mut self, entity: &T) -> RepoResult<()> {
        self.set_mut::<T>()?.mark_deleted(entity)
    }

    fn fetch<T: Entity>(&mut self, key: &EntityKey) -> RepoResult<Option<&mut T>> {
        let tracked = self
            .set::<T>()
            .map(|set| (set.get(key).is_some(), set.state(key)));
        match tracked {
            Some((true, _)) => return Ok(self.tracked_mut::<T>(key)),
            Some((false, Some(EntryState::Deleted))) => return Ok(None),
            _ => {}
        }

        let Some(record) = statements::select_by_key(&self.conn, T::descriptor(), key)? else {
            return Ok(None);
        };
        let entity = hydrate::<T>(record)?;
        let stored_key = resolve_key(&entity)?;
        Ok(Some(self.set_mut::<T>()?.track_unchanged(stored_key, entity)))
    }

    fn tracked_mut<T: Entity>(&mut self, key: &EntityKey) -> Option<&mut T> {
        self.existing_set_mut::<T>()?.get_mut(key)
    }

    fn query<T: Entity>(&mut self, includes: &[&str]) -> RepoResult<Vec<T>> {
        let descriptor = T::descriptor();
        let relationships = includes
            .iter()
            .map(|name| relationship_of(descriptor, name))
            .collect::<RepoResult<Vec<_>>>()?;

        let mut entities = Vec::new();
        for record in statements::select_all(&self.conn, descriptor)? {
            let mut entity = hydrate::<T>(record)?;
            if !relationships.is_empty() {
                let key = resolve_key(&entity)?;
                for relationship in &relationships {
                    let records = statements::select_members(&self.conn, relationship, &key)?;
                    entity
                        .related_mut(relationship.name)
                        .ok_or_else(|| unknown_relationship(descriptor, relationship.name))?
                        .materialize(records)?;
                }
            }
            entities.push(entity);
        }
        Ok(entities)
    }

    fn load_reference<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()> {
        self.load_related::<T>(key, name, RelationshipKind::Reference)
    }

    fn load_collection<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()> {
        self.load_related::<T>(key, name, RelationshipKind::Collection)
    }

    fn save_changes(&mut self) -> RepoResult<usize> {
        let started_at = Instant::now();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let mut written = 0;
        for phase in [FlushPhase::Insert, FlushPhase::Update, FlushPhase::Delete] {
            for tracked in &mut self.sets {
                let count = tracked.set.flush(&tx, phase)?;
                if count > 0 {
                    debug!(
                        "event=context_flush module=context status=ok entity={} phase={:?} written={}",
                        tracked.set.descriptor().name,
                        phase,
                        count
                    );
                }
                written += count;
            }
        }
        tx.commit()?;

        for tracked in &mut self.sets {
            tracked.set.accept_changes();
        }
        info!(
            "event=context_save module=context status=ok written={} duration_ms={}",
            written,
            started_at.elapsed().as_millis()
        );
        Ok(written)
    }

    fn change_tracking(&mut self) -> Option<&mut dyn ChangeTracking> {
        Some(self)
    }

    fn dispose(&mut self) {
        let released = self.tracked_count();
        for tracked in &mut self.sets {
            tracked.set.clear();
        }
        debug!("event=context_dispose module=context status=ok released={released}");
    }
}

impl ChangeTracking for SqliteContext {
    fn set_modified(&mut self, entry: &EntryRef, updated: &dyn FieldAccess) -> RepoResult<()> {
        let tracked = self
            .sets
            .iter_mut()
            .find(|tracked| tracked.type_id == entry.type_id)
            .ok_or_else(|| untracked(entry.entity, &entry.key))?;
        tracked.set.set_modified(&entry.key, updated)
    }
}

fn relationship_of(
    descriptor: &'static EntityDescriptor,
    name: &str,
) -> RepoResult<&'static RelationshipDescriptor> {
    descriptor
        .relationship(name)
        .ok_or_else(|| unknown_relationship(descriptor, name))
}

fn unknown_relationship(descriptor: &'static EntityDescriptor, name: &str) -> RepoError {
    RepoError::UnknownRelationship {
        entity: descriptor.name,
        name: name.to_string(),
    }
}

fn untracked(descriptor: &'static EntityDescriptor, key: &EntityKey) -> RepoError {
    RepoError::NotFound {
        entity: descriptor.name,
        key: key.clone(),
    }
}

fn kind_label(kind: RelationshipKind) -> &'static str {
    match kind {
        RelationshipKind::Reference => "reference",
        RelationshipKind::Collection => "collection",
    }
}
