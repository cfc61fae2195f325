//! Generic repository for detached entity graphs.
//! Detached entities are merged into a tracking persistence context, with
//! relationship collections reconciled by identity.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use context::{ChangeTracking, EntitySet, EntryRef, EntryState, PersistenceContext, SqliteContext};
pub use db::{open_db, open_db_in_memory, open_db_with, ConnectionOptions, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::descriptor::{EntityDescriptor, RelationshipDescriptor, RelationshipKind};
pub use model::entity::{
    bool_field, bool_to_value, hydrate, integer_field, optional_text_field, real_field,
    snapshot_fields, text_field, Entity, FieldAccess, Identifiable, Record,
};
pub use model::key::{resolve_key, resolve_key_erased, same_identity, EntityKey};
pub use model::related::Related;
pub use repo::error::{RepoError, RepoResult};
pub use repo::loader::{ContextLoader, NoopLoader, RelationshipLoader};
pub use repo::reconcile::{reconcile, reconcile_related, Reconciliation};
pub use repo::repository::Repository;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
