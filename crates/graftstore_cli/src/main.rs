//! Demo: create a model with related items, then update it detached.
//!
//! # Responsibility
//! - Exercise create, save and a detached collection update end to end.
//! - Print the accumulated change count.
//!
//! Usage: `graftstore_cli [DB_PATH]`. Without a path the demo recreates
//! `graftstore-demo.db` in the temp directory.

use graftstore_core::{
    default_log_level, init_logging, integer_field, text_field, Entity, EntityDescriptor,
    FieldAccess, Identifiable, Related, RelationshipDescriptor, RepoError, RepoResult, Repository,
    SqliteContext,
};
use log::info;
use rusqlite::types::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS models (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS related (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS model_related (
    model_id INTEGER NOT NULL REFERENCES models(id) ON DELETE CASCADE,
    related_id INTEGER NOT NULL REFERENCES related(id) ON DELETE CASCADE,
    PRIMARY KEY (model_id, related_id)
);
";

#[derive(Debug, Clone, Default)]
struct RelatedItem {
    id: i64,
    name: String,
}

impl Identifiable for RelatedItem {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for RelatedItem {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("related", name, value)?,
            "name" => self.name = text_field("related", name, value)?,
            other => {
                return Err(RepoError::UnknownField {
                    entity: "related",
                    field: other.to_string(),
                })
            }
        }
        Ok(())
    }
}

impl Entity for RelatedItem {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor =
            EntityDescriptor::new("related").with_fields(&["id", "name"]);
        &DESCRIPTOR
    }
}

#[derive(Debug, Clone, Default)]
struct Model {
    id: i64,
    name: String,
    related: Vec<RelatedItem>,
}

impl Identifiable for Model {
    fn id(&self) -> i64 {
        self.id
    }
}

impl FieldAccess for Model {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> RepoResult<()> {
        match name {
            "id" => self.id = integer_field("models", name, value)?,
            "name" => self.name = text_field("models", name, value)?,
            other => {
                return Err(RepoError::UnknownField {
                    entity: "models",
                    field: other.to_string(),
                })
            }
        }
        Ok(())
    }
}

impl Entity for Model {
    fn descriptor() -> &'static EntityDescriptor {
        static DESCRIPTOR: EntityDescriptor = EntityDescriptor::new("models")
            .with_fields(&["id", "name"])
            .with_relationships(&[RelationshipDescriptor::collection(
                "related",
                RelatedItem::descriptor,
                "model_related",
                "model_id",
                "related_id",
            )]);
        &DESCRIPTOR
    }

    fn related(&self, name: &str) -> Option<&dyn Related> {
        (name == "related").then_some(&self.related as &dyn Related)
    }

    fn related_mut(&mut self, name: &str) -> Option<&mut dyn Related> {
        (name == "related").then_some(&mut self.related as &mut dyn Related)
    }
}

fn related(id: i64, name: &str) -> RelatedItem {
    RelatedItem {
        id,
        name: name.to_string(),
    }
}

fn open_repository(path: &Path) -> RepoResult<Repository<Model, SqliteContext>> {
    let context = SqliteContext::open(path)?;
    context.connection().execute_batch(SCHEMA)?;
    Repository::try_new(context)
}

fn run(path: &Path) -> RepoResult<usize> {
    let mut changes = 0;

    let mut repo = open_repository(path)?;
    repo.create(Model {
        id: 0,
        name: "one".to_string(),
        related: vec![related(0, "One"), related(0, "Two")],
    })?;
    changes += repo.save_changes()?;
    repo.dispose();

    let mut repo = open_repository(path)?;
    repo.update(
        Model {
            id: 1,
            name: "updated one".to_string(),
            related: vec![related(2, "Two")],
        },
        &["related"],
    )?;
    changes += repo.save_changes()?;

    info!("event=demo_run module=cli status=ok changes={changes}");
    Ok(changes)
}

fn main() -> ExitCode {
    let path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let path = std::env::temp_dir().join("graftstore-demo.db");
            // The default file belongs to the demo; start from an empty store.
            let _ = std::fs::remove_file(&path);
            path
        }
    };

    let log_dir = std::env::temp_dir().join("graftstore-logs");
    if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
        eprintln!("logging disabled: {err}");
    }

    match run(&path) {
        Ok(changes) => {
            println!("{changes}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("graftstore demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}
