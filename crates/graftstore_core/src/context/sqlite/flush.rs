//! Writes pending entity-set changes inside an open transaction.
//!
//! # Invariants
//! - Each phase only touches entries in the matching state.
//! - Link rows follow the loaded-member snapshot; unloaded relationships are
//!   never written.
//! - Snapshots are refreshed as rows are written, so a failed commit leaves
//!   them ahead of the store.

use crate::context::tracker::{EntityEntry, EntitySet};
use crate::context::EntryState;
use crate::model::descriptor::{EntityDescriptor, RelationshipDescriptor};
use crate::model::entity::{Entity, FieldAccess};
use crate::model::key::{resolve_key_erased, EntityKey};
use crate::model::related::Related;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::any::Any;
use std::collections::HashSet;

use super::statements::{
    delete_link, delete_links, delete_row, insert_link, insert_row, update_row, OnConflict,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushPhase {
    Insert,
    Update,
    Delete,
}

/// Entity set viewed without its entity type.
pub(crate) trait ErasedSet {
    fn descriptor(&self) -> &'static EntityDescriptor;

    fn len(&self) -> usize;

    fn set_modified(&mut self, key: &EntityKey, updated: &dyn FieldAccess) -> RepoResult<()>;

    /// Writes entries belonging to `phase` and returns the change count.
    fn flush(&mut self, conn: &Connection, phase: FlushPhase) -> RepoResult<usize>;

    fn accept_changes(&mut self);

    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> ErasedSet for EntitySet<T> {
    fn descriptor(&self) -> &'static EntityDescriptor {
        T::descriptor()
    }

    fn len(&self) -> usize {
        EntitySet::len(self)
    }

    fn set_modified(&mut self, key: &EntityKey, updated: &dyn FieldAccess) -> RepoResult<()> {
        EntitySet::set_modified(self, key, updated)
    }

    fn flush(&mut self, conn: &Connection, phase: FlushPhase) -> RepoResult<usize> {
        let mut written = 0;
        for entry in self.entries_mut() {
            written += match (phase, entry.state) {
                (FlushPhase::Insert, EntryState::Added) => insert_entry(conn, entry)?,
                (FlushPhase::Update, EntryState::Modified | EntryState::Unchanged) => {
                    update_entry(conn, entry)?
                }
                (FlushPhase::Delete, EntryState::Deleted) => delete_entry(conn, entry)?,
                _ => 0,
            };
        }
        Ok(written)
    }

    fn accept_changes(&mut self) {
        EntitySet::accept_changes(self);
    }

    fn clear(&mut self) {
        EntitySet::clear(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn insert_entry<T: Entity>(conn: &Connection, entry: &mut EntityEntry<T>) -> RepoResult<usize> {
    let descriptor = T::descriptor();
    let (key, mut written) = insert_row(conn, descriptor, &mut entry.entity, OnConflict::Fail)?;
    entry.key = key;

    for relationship in descriptor.relationships {
        let Some(member) = entry.entity.related_mut(relationship.name) else {
            continue;
        };
        written += persist_members(conn, relationship, member, &HashSet::new())?;
        let member_keys = member.member_keys()?;
        for member_key in &member_keys {
            insert_link(conn, relationship, &entry.key, member_key)?;
        }
        entry.loaded.insert(relationship.name, member_keys);
    }
    Ok(written)
}

/// Writes dirty columns and link changes of one tracked entity.
///
/// Counts the entity once when anything about it changed, plus every member
/// row newly inserted.
fn update_entry<T: Entity>(conn: &Connection, entry: &mut EntityEntry<T>) -> RepoResult<usize> {
    let descriptor = T::descriptor();
    let mut touched = false;
    let mut created = 0;

    if !entry.modified.is_empty() {
        let values = entry
            .modified
            .iter()
            .map(|field| {
                entry
                    .entity
                    .field(field)
                    .map(|value| (*field, value))
                    .ok_or_else(|| RepoError::UnknownField {
                        entity: descriptor.name,
                        field: field.to_string(),
                    })
            })
            .collect::<RepoResult<Vec<(&'static str, Value)>>>()?;
        update_row(conn, descriptor, &entry.key, &values)?;
        touched = true;
    }

    for relationship in descriptor.relationships {
        let Some(before) = entry.loaded.get(relationship.name) else {
            continue;
        };
        let Some(member) = entry.entity.related_mut(relationship.name) else {
            continue;
        };
        let stored: HashSet<EntityKey> = before.iter().cloned().collect();
        created += persist_members(conn, relationship, member, &stored)?;

        let after = member.member_keys()?;
        let current: HashSet<&EntityKey> = after.iter().collect();
        for removed in before.iter().filter(|key| !current.contains(key)) {
            delete_link(conn, relationship, &entry.key, removed)?;
            touched = true;
        }
        for added in after.iter().filter(|key| !stored.contains(*key)) {
            insert_link(conn, relationship, &entry.key, added)?;
            touched = true;
        }
        entry.loaded.insert(relationship.name, after);
    }

    Ok(usize::from(touched) + created)
}

fn delete_entry<T: Entity>(conn: &Connection, entry: &mut EntityEntry<T>) -> RepoResult<usize> {
    let descriptor = T::descriptor();
    for relationship in descriptor.relationships {
        delete_links(conn, relationship, &entry.key)?;
    }
    delete_row(conn, descriptor, &entry.key)
}

/// Inserts members whose key is not in `stored`.
///
/// Rows that already exist under the same assigned key are left as stored;
/// any other store failure aborts the flush.
fn persist_members(
    conn: &Connection,
    relationship: &RelationshipDescriptor,
    member: &mut dyn Related,
    stored: &HashSet<EntityKey>,
) -> RepoResult<usize> {
    let descriptor = relationship.member_descriptor();
    let mut created = 0;
    for item in member.members_mut() {
        if stored.contains(&resolve_key_erased(descriptor, &*item)?) {
            continue;
        }
        let (_, written) = insert_row(conn, descriptor, item, OnConflict::KeepExisting)?;
        created += written;
    }
    Ok(created)
}
