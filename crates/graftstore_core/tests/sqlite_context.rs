mod common;

use common::{
    count_rows, item, open_store, owner, owner_item_ids, seed_owner_with_items, Item, KeyedOwner,
    Owner,
};
use graftstore_core::{
    ChangeTracking, ConnectionOptions, EntityKey, EntryRef, EntryState, PersistenceContext,
    RepoError, SqliteContext,
};
use std::time::Duration;

#[test]
fn fetch_tracks_loaded_entities_as_unchanged() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let key = EntityKey::Integer(1);

    let fetched = context.fetch::<Owner>(&key).unwrap().unwrap();
    fetched.name = "edited in place".to_string();

    assert_eq!(context.entry_state::<Owner>(&key), Some(EntryState::Unchanged));
    assert_eq!(
        context.tracked::<Owner>(&key).unwrap().name,
        "edited in place"
    );
    assert_eq!(context.tracked_count(), 1);
}

#[test]
fn set_modified_records_only_changed_fields() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let key = EntityKey::Integer(1);
    context.fetch::<Owner>(&key).unwrap().unwrap();

    context
        .set_modified(&EntryRef::of::<Owner>(key.clone()), &owner(1, "owner", vec![]))
        .unwrap();
    assert!(context.modified_fields::<Owner>(&key).is_empty());
    assert_eq!(context.entry_state::<Owner>(&key), Some(EntryState::Modified));

    context
        .set_modified(&EntryRef::of::<Owner>(key.clone()), &owner(1, "renamed", vec![]))
        .unwrap();
    assert_eq!(context.modified_fields::<Owner>(&key), vec!["name"]);
}

#[test]
fn set_modified_on_untracked_entry_is_not_found() {
    let mut context = open_store();
    let err = context
        .set_modified(&EntryRef::of::<Owner>(EntityKey::Integer(3)), &owner(3, "x", vec![]))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn load_collection_materializes_members_once() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let key = EntityKey::Integer(1);
    context.fetch::<Owner>(&key).unwrap().unwrap();

    context.load_collection::<Owner>(&key, "items").unwrap();
    context.load_collection::<Owner>(&key, "items").unwrap();

    let ids: Vec<_> = context
        .tracked::<Owner>(&key)
        .unwrap()
        .items
        .iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert!(context.is_loaded::<Owner>(&key, "items"));
}

#[test]
fn load_collection_rejects_reference_relationship() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let key = EntityKey::Integer(1);
    context.fetch::<Owner>(&key).unwrap().unwrap();

    let err = context.load_collection::<Owner>(&key, "primary").unwrap_err();

    assert!(matches!(err, RepoError::InvalidDescriptor { .. }));
}

#[test]
fn load_requires_tracked_owner() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());

    let err = context
        .load_collection::<Owner>(&EntityKey::Integer(1), "items")
        .unwrap_err();

    assert!(err.is_not_found());
}

#[test]
fn query_reads_committed_rows_only() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    context.add(&owner(2, "pending", vec![])).unwrap();

    let stored: Vec<Owner> = context.query(&[]).unwrap();

    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, 1);
}

#[test]
fn save_settles_entry_states() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let existing = EntityKey::Integer(1);
    context.fetch::<Owner>(&existing).unwrap().unwrap();
    context
        .set_modified(&EntryRef::of::<Owner>(existing.clone()), &owner(1, "renamed", vec![]))
        .unwrap();
    context.add(&item(0, "fresh")).unwrap();

    let written = context.save_changes().unwrap();

    assert_eq!(written, 2);
    assert_eq!(
        context.entry_state::<Owner>(&existing),
        Some(EntryState::Unchanged)
    );
    assert!(context.modified_fields::<Owner>(&existing).is_empty());
    let fresh = context.tracked::<Item>(&EntityKey::Integer(4)).unwrap();
    assert_eq!(fresh.name, "fresh");
    assert_eq!(
        context.entry_state::<Item>(&EntityKey::Integer(4)),
        Some(EntryState::Unchanged)
    );
}

#[test]
fn failed_save_rolls_back_every_phase() {
    let mut context = open_store();
    context
        .connection()
        .execute(
            "INSERT INTO keyed_owners (id, code, name) VALUES (1, 'alpha', 'stored');",
            [],
        )
        .unwrap();
    context.add(&owner(0, "valid", vec![item(0, "member")])).unwrap();
    context
        .add(&KeyedOwner {
            id: 2,
            code: "alpha".to_string(),
            name: "duplicate".to_string(),
            items: vec![],
        })
        .unwrap();

    let err = context.save_changes().unwrap_err();

    assert!(matches!(err, RepoError::Db(_)));
    assert_eq!(count_rows(context.connection(), "owners"), 0);
    assert_eq!(count_rows(context.connection(), "items"), 0);
}

#[test]
fn update_of_row_deleted_behind_the_context_is_not_found() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    let key = EntityKey::Integer(1);
    context.fetch::<Owner>(&key).unwrap().unwrap();
    context
        .connection()
        .execute_batch("DELETE FROM owner_items; DELETE FROM owners;")
        .unwrap();
    context
        .set_modified(&EntryRef::of::<Owner>(key.clone()), &owner(1, "renamed", vec![]))
        .unwrap();

    let err = context.save_changes().unwrap_err();

    assert!(matches!(
        err,
        RepoError::NotFound {
            entity: "owners",
            ..
        }
    ));
}

#[test]
fn change_tracking_capability_is_offered() {
    let mut context = open_store();
    assert!(context.change_tracking().is_some());
}

#[test]
fn dispose_releases_tracked_entries() {
    let mut context = open_store();
    seed_owner_with_items(context.connection());
    context.fetch::<Owner>(&EntityKey::Integer(1)).unwrap().unwrap();
    context.add(&item(8, "eight")).unwrap();

    context.dispose();

    assert_eq!(context.tracked_count(), 0);
    assert_eq!(owner_item_ids(context.connection(), 1), vec![2, 3, 1]);
}

#[test]
fn file_context_honours_connection_options() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConnectionOptions {
        busy_timeout: Duration::from_millis(250),
        foreign_keys: false,
    };

    let context = SqliteContext::open_with(dir.path().join("options.db"), &options).unwrap();

    let enabled: i64 = context
        .connection()
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 0);
}

#[test]
fn entry_states_serialize_as_snake_case() {
    assert_eq!(
        serde_json::to_string(&EntryState::Unchanged).unwrap(),
        "\"unchanged\""
    );
    let state: EntryState = serde_json::from_str("\"deleted\"").unwrap();
    assert_eq!(state, EntryState::Deleted);
}
