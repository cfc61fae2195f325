//! Type-erased relationship members.
//!
//! # Responsibility
//! - Let the store materialize, inspect and persist relationship members
//!   without knowing the member type.
//! - Route in-place reconciliation to the typed reconciler.
//!
//! # Invariants
//! - `Vec<C>` is the only member shape supporting add/remove.
//! - `materialize` merges by identity and keeps instances already present.

use crate::model::descriptor::RelationshipKind;
use crate::model::entity::{hydrate, Entity, FieldAccess, Record};
use crate::model::key::{resolve_key, EntityKey};
use crate::repo::error::RepoResult;
use crate::repo::reconcile::{reconcile, Reconciliation};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

/// Relationship member viewed without its concrete type.
pub trait Related {
    fn kind(&self) -> RelationshipKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of the current members, in member order.
    fn member_keys(&self) -> RepoResult<Vec<EntityKey>>;

    /// Returns whether members can be added and removed in place.
    fn supports_mutation(&self) -> bool;

    /// Merges loaded rows into the member, skipping keys already present.
    fn materialize(&mut self, records: Vec<Record>) -> RepoResult<()>;

    /// Mutable views of the members, used to write back generated keys.
    fn members_mut(&mut self) -> Vec<&mut dyn FieldAccess>;

    /// Applies the identity diff against `incoming` in place.
    ///
    /// Returns `None` when this member cannot absorb `incoming`: it lacks
    /// add/remove support or `incoming` has a different member type.
    fn reconcile_with(&mut self, incoming: &dyn Related) -> Option<RepoResult<Reconciliation>>;

    fn as_any(&self) -> &dyn Any;
}

impl<C: Entity> Related for Vec<C> {
    fn kind(&self) -> RelationshipKind {
        RelationshipKind::Collection
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn member_keys(&self) -> RepoResult<Vec<EntityKey>> {
        self.iter().map(resolve_key).collect()
    }

    fn supports_mutation(&self) -> bool {
        true
    }

    fn materialize(&mut self, records: Vec<Record>) -> RepoResult<()> {
        let mut known: HashSet<EntityKey> = self.member_keys()?.into_iter().collect();
        for record in records {
            let member = hydrate::<C>(record)?;
            if known.insert(resolve_key(&member)?) {
                self.push(member);
            }
        }
        Ok(())
    }

    fn members_mut(&mut self) -> Vec<&mut dyn FieldAccess> {
        self.iter_mut()
            .map(|member| member as &mut dyn FieldAccess)
            .collect()
    }

    fn reconcile_with(&mut self, incoming: &dyn Related) -> Option<RepoResult<Reconciliation>> {
        let incoming = incoming.as_any().downcast_ref::<Vec<C>>()?;
        Some(reconcile(self, incoming))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<C: Entity> Related for Option<C> {
    fn kind(&self) -> RelationshipKind {
        RelationshipKind::Reference
    }

    fn len(&self) -> usize {
        usize::from(self.is_some())
    }

    fn member_keys(&self) -> RepoResult<Vec<EntityKey>> {
        self.iter().map(resolve_key).collect()
    }

    fn supports_mutation(&self) -> bool {
        false
    }

    fn materialize(&mut self, records: Vec<Record>) -> RepoResult<()> {
        if self.is_some() {
            return Ok(());
        }
        if let Some(record) = records.into_iter().next() {
            *self = Some(hydrate::<C>(record)?);
        }
        Ok(())
    }

    fn members_mut(&mut self) -> Vec<&mut dyn FieldAccess> {
        self.iter_mut()
            .map(|member| member as &mut dyn FieldAccess)
            .collect()
    }

    fn reconcile_with(&mut self, _incoming: &dyn Related) -> Option<RepoResult<Reconciliation>> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared, fixed-size collection. Loadable, but cannot be reconciled.
impl<C: Entity> Related for Arc<[C]> {
    fn kind(&self) -> RelationshipKind {
        RelationshipKind::Collection
    }

    fn len(&self) -> usize {
        self.as_ref().len()
    }

    fn member_keys(&self) -> RepoResult<Vec<EntityKey>> {
        self.iter().map(resolve_key).collect()
    }

    fn supports_mutation(&self) -> bool {
        false
    }

    fn materialize(&mut self, records: Vec<Record>) -> RepoResult<()> {
        let mut members: Vec<C> = self.to_vec();
        Related::materialize(&mut members, records)?;
        *self = members.into();
        Ok(())
    }

    fn members_mut(&mut self) -> Vec<&mut dyn FieldAccess> {
        match Arc::get_mut(self) {
            Some(members) => members
                .iter_mut()
                .map(|member| member as &mut dyn FieldAccess)
                .collect(),
            None => Vec::new(),
        }
    }

    fn reconcile_with(&mut self, _incoming: &dyn Related) -> Option<RepoResult<Reconciliation>> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
