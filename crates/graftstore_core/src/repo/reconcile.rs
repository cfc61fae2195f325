//! Identity-based collection reconciliation.
//!
//! # Responsibility
//! - Merge an incoming desired-state collection into a persisted one.
//!
//! # Invariants
//! - Additions and removals are both computed before any mutation.
//! - Additions are appended first, removals dropped afterwards.
//! - Items present on both sides keep their persisted instance and position;
//!   their scalar fields are never touched.

use crate::model::entity::Entity;
use crate::model::key::{resolve_key, EntityKey};
use crate::model::related::Related;
use crate::repo::error::{RepoError, RepoResult};
use std::collections::HashSet;

/// Counts applied by one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: usize,
    pub removed: usize,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Makes `persisted` hold, by identity, exactly the items of `incoming`.
///
/// `incoming` is only read; added items are cloned into `persisted`.
pub fn reconcile<C: Entity>(persisted: &mut Vec<C>, incoming: &[C]) -> RepoResult<Reconciliation> {
    let persisted_keys = keys_of(persisted)?;
    let incoming_keys = keys_of(incoming)?;
    let persisted_set: HashSet<&EntityKey> = persisted_keys.iter().collect();
    let incoming_set: HashSet<&EntityKey> = incoming_keys.iter().collect();

    let additions: Vec<C> = incoming
        .iter()
        .zip(&incoming_keys)
        .filter(|(_, key)| !persisted_set.contains(key))
        .map(|(item, _)| item.clone())
        .collect();
    let keep: Vec<bool> = persisted_keys
        .iter()
        .map(|key| incoming_set.contains(key))
        .chain(std::iter::repeat(true).take(additions.len()))
        .collect();

    let outcome = Reconciliation {
        added: additions.len(),
        removed: keep.iter().filter(|kept| !**kept).count(),
    };

    persisted.extend(additions);
    let mut keep = keep.into_iter();
    persisted.retain(|_| keep.next().unwrap_or(true));

    Ok(outcome)
}

/// Reconciles one named relationship member of `entity` in place.
///
/// # Errors
/// - `UnsupportedCollection` when `persisted` cannot add/remove items or the
///   two members have different concrete types.
pub fn reconcile_related(
    entity: &'static str,
    name: &str,
    persisted: &mut dyn Related,
    incoming: &dyn Related,
) -> RepoResult<Reconciliation> {
    let unsupported = || RepoError::UnsupportedCollection {
        entity,
        name: name.to_string(),
    };

    if !persisted.supports_mutation() {
        return Err(unsupported());
    }
    persisted.reconcile_with(incoming).ok_or_else(unsupported)?
}

fn keys_of<C: Entity>(items: &[C]) -> RepoResult<Vec<EntityKey>> {
    items.iter().map(resolve_key).collect()
}
