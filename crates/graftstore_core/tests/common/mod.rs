#![allow(dead_code)]

use async_trait::async_trait;
use graftstore_core::{
    integer_field, text_field, ChangeTracking, Entity, EntityDescriptor, EntityKey, EntryRef,
    FieldAccess, Identifiable, PersistenceContext, Related, RelationshipDescriptor, RepoError,
    RepoResult, SqliteContext,
};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

pub const SCHEMA: &str = "
CREATE TABLE items (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE owners (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE owner_items (
    owner_id INTEGER NOT NULL REFERENCES owners(id),
    item_id INTEGER NOT NULL REFERENCES items(id),
    PRIMARY KEY (owner_id, item_id)
);
CREATE TABLE owner_primary (
    owner_id INTEGER NOT NULL REFERENCES owners(id),
    item_id INTEGER NOT NULL REFERENCES items(id),
    PRIMARY KEY (owner_id)
);
CREATE TABLE keyed_owners (
    id INTEGER NOT NULL DEFAULT 0,
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE keyed_owner_items (
    owner_code TEXT NOT NULL REFERENCES keyed_owners(code),
    item_id INTEGER NOT NULL REFERENCES items(id),
    PRIMARY KEY (owner_code, item_id)
);
CREATE TABLE frozen_owners (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE frozen_owner_items (
    owner_id INTEGER NOT NULL REFERENCES frozen_owners(id),
    item_id INTEGER NOT NULL REFERENCES items(id),
    PRIMARY KEY (owner_id, item_id)
);
CREATE TABLE frozen_owner_extras (
    owner_id INTEGER NOT NULL REFERENCES frozen_owners(id),
    item_id INTEGER NOT NULL REFERENCES items(id),
    PRIMARY KEY (owner_id, item_id)
);
";

fn unknown_field(entity: &'static str, field: &str) -> RepoError {
    RepoError::UnknownField {
        entity,
        field: field.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
}

pub fn item(id: i64, name: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
    }
}

impl Identifiable for Item {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for Item {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("items", name, value)?,
            "name" => self.name = text_field("items", name, value)?,
            other => return Err(unknown_field("items", other)),
        }
        Ok(())
    }
}

impl Entity for Item {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor =
            EntityDescriptor::new("items").with_fields(&["id", "name"]);
        &DESCRIPTOR
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub items: Vec<Item>,
    pub primary: Option<Item>,
}

pub fn owner(id: i64, name: &str, items: Vec<Item>) -> Owner {
    Owner {
        id,
        name: name.to_string(),
        items,
        primary: None,
    }
}

impl Identifiable for Owner {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for Owner {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("owners", name, value)?,
            "name" => self.name = text_field("owners", name, value)?,
            other => return Err(unknown_field("owners", other)),
        }
        Ok(())
    }
}

impl Entity for Owner {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor::new("owners")
            .with_fields(&["id", "name"])
            .with_relationships(&[
                RelationshipDescriptor::collection(
                    "items",
                    Item::descriptor,
                    "owner_items",
                    "owner_id",
                    "item_id",
                ),
                RelationshipDescriptor::reference(
                    "primary",
                    Item::descriptor,
                    "owner_primary",
                    "owner_id",
                    "item_id",
                ),
            ]);
        &DESCRIPTOR
    }

    fn related(&self, name: &str) -> Option<&dyn Related> {
        match name {
            "items" => Some(&self.items as &dyn Related),
            "primary" => Some(&self.primary as &dyn Related),
            _ => None,
        }
    }

    fn related_mut(&mut self, name: &str) -> Option<&mut dyn Related> {
        match name {
            "items" => Some(&mut self.items as &mut dyn Related),
            "primary" => Some(&mut self.primary as &mut dyn Related),
            _ => None,
        }
    }
}

/// Owner identified by its `code` column rather than `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedOwner {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub items: Vec<Item>,
}

impl Identifiable for KeyedOwner {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for KeyedOwner {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "code" => Some(Value::Text(self.code.clone())),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("keyed_owners", name, value)?,
            "code" => self.code = text_field("keyed_owners", name, value)?,
            "name" => self.name = text_field("keyed_owners", name, value)?,
            other => return Err(unknown_field("keyed_owners", other)),
        }
        Ok(())
    }
}

impl Entity for KeyedOwner {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor::new("keyed_owners")
            .with_key("code")
            .with_fields(&["id", "code", "name"])
            .with_relationships(&[RelationshipDescriptor::collection(
                "items",
                Item::descriptor,
                "keyed_owner_items",
                "owner_code",
                "item_id",
            )]);
        &DESCRIPTOR
    }

    fn related(&self, name: &str) -> Option<&dyn Related> {
        (name == "items").then_some(&self.items as &dyn Related)
    }

    fn related_mut(&mut self, name: &str) -> Option<&mut dyn Related> {
        (name == "items").then_some(&mut self.items as &mut dyn Related)
    }
}

/// Owner whose `items` live in a shared slice that cannot grow or shrink.
/// `extras` is an ordinary collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenOwner {
    pub id: i64,
    pub name: String,
    pub items: Arc<[Item]>,
    pub extras: Vec<Item>,
}

impl Default for FrozenOwner {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            items: Vec::new().into(),
            extras: Vec::new(),
        }
    }
}

impl Identifiable for FrozenOwner {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for FrozenOwner {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("frozen_owners", name, value)?,
            "name" => self.name = text_field("frozen_owners", name, value)?,
            other => return Err(unknown_field("frozen_owners", other)),
        }
        Ok(())
    }
}

impl Entity for FrozenOwner {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor::new("frozen_owners")
            .with_fields(&["id", "name"])
            .with_relationships(&[
                RelationshipDescriptor::collection(
                    "items",
                    Item::descriptor,
                    "frozen_owner_items",
                    "owner_id",
                    "item_id",
                ),
                RelationshipDescriptor::collection(
                    "extras",
                    Item::descriptor,
                    "frozen_owner_extras",
                    "owner_id",
                    "item_id",
                ),
            ]);
        &DESCRIPTOR
    }

    fn related(&self, name: &str) -> Option<&dyn Related> {
        match name {
            "items" => Some(&self.items as &dyn Related),
            "extras" => Some(&self.extras as &dyn Related),
            _ => None,
        }
    }

    fn related_mut(&mut self, name: &str) -> Option<&mut dyn Related> {
        match name {
            "items" => Some(&mut self.items as &mut dyn Related),
            "extras" => Some(&mut self.extras as &mut dyn Related),
            _ => None,
        }
    }
}

/// In-memory context with the full test schema.
pub fn open_store() -> SqliteContext {
    let context = SqliteContext::open_in_memory().unwrap();
    context.connection().execute_batch(SCHEMA).unwrap();
    context
}

/// File-backed context; creates the schema when the file is new.
pub fn open_file_store(path: &Path) -> SqliteContext {
    let fresh = !path.exists();
    let context = SqliteContext::open(path).unwrap();
    if fresh {
        context.connection().execute_batch(SCHEMA).unwrap();
    }
    context
}

/// Seeds owner 1 linked to items 2, 3 and 1, in that order.
pub fn seed_owner_with_items(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO items (id, name) VALUES (1, 'one'), (2, 'two'), (3, 'three');
         INSERT INTO owners (id, name) VALUES (1, 'owner');
         INSERT INTO owner_items (owner_id, item_id) VALUES (1, 2), (1, 3), (1, 1);",
    )
    .unwrap();
}

/// Member ids linked to `owner`, in link insertion order.
pub fn linked_ids(conn: &Connection, link_table: &str, owner_column: &str, owner: &EntityKey) -> Vec<i64> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT item_id FROM {link_table} WHERE {owner_column} = ?1 ORDER BY rowid;"
        ))
        .unwrap();
    let ids = stmt
        .query_map([owner], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    ids
}

pub fn owner_item_ids(conn: &Connection, owner: i64) -> Vec<i64> {
    linked_ids(conn, "owner_items", "owner_id", &EntityKey::Integer(owner))
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// Wraps `SqliteContext`, optionally hiding change tracking and counting
/// `set_modified` calls.
pub struct CountingContext {
    pub inner: SqliteContext,
    pub tracking: bool,
    pub set_modified_calls: usize,
    /// Shared so the count stays readable after the repository is dropped.
    pub dispose_calls: Rc<Cell<usize>>,
}

impl CountingContext {
    pub fn new(inner: SqliteContext) -> Self {
        Self {
            inner,
            tracking: true,
            set_modified_calls: 0,
            dispose_calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn without_tracking(inner: SqliteContext) -> Self {
        Self {
            tracking: false,
            ..Self::new(inner)
        }
    }
}

#[async_trait(?Send)]
impl PersistenceContext for CountingContext {
    fn ensure_mapped(&self, descriptor: &'static EntityDescriptor) -> RepoResult<()> {
        self.inner.ensure_mapped(descriptor)
    }

    fn add<T: Entity>(&mut self, entity: &T) -> RepoResult<()> {
        self.inner.add(entity)
    }

    fn remove<T: Entity>(&mut self, entity: &T) -> RepoResult<()> {
        self.inner.remove(entity)
    }

    fn fetch<T: Entity>(&mut self, key: &EntityKey) -> RepoResult<Option<&mut T>> {
        self.inner.fetch(key)
    }

    fn tracked_mut<T: Entity>(&mut self, key: &EntityKey) -> Option<&mut T> {
        self.inner.tracked_mut(key)
    }

    fn query<T: Entity>(&mut self, includes: &[&str]) -> RepoResult<Vec<T>> {
        self.inner.query(includes)
    }

    fn load_reference<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()> {
        self.inner.load_reference::<T>(key, name)
    }

    fn load_collection<T: Entity>(&mut self, key: &EntityKey, name: &str) -> RepoResult<()> {
        self.inner.load_collection::<T>(key, name)
    }

    fn save_changes(&mut self) -> RepoResult<usize> {
        self.inner.save_changes()
    }

    fn change_tracking(&mut self) -> Option<&mut dyn ChangeTracking> {
        if self.tracking {
            Some(self)
        } else {
            None
        }
    }

    fn dispose(&mut self) {
        self.dispose_calls.set(self.dispose_calls.get() + 1);
        self.inner.dispose();
    }
}

impl ChangeTracking for CountingContext {
    fn set_modified(&mut self, entry: &EntryRef, updated: &dyn FieldAccess) -> RepoResult<()> {
        self.set_modified_calls += 1;
        self.inner.set_modified(entry, updated)
    }
}
