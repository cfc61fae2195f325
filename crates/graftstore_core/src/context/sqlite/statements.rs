//! SQL built from entity descriptors.
//!
//! # Invariants
//! - Identifiers come from validated descriptors and are double-quoted.
//! - Values are always bound as parameters.
//! - Row order is deterministic: `rowid` for tables, link `rowid` for members.

use crate::model::descriptor::{EntityDescriptor, RelationshipDescriptor};
use crate::model::entity::{snapshot_fields, FieldAccess, Record};
use crate::model::key::{resolve_key_erased, EntityKey};
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnConflict {
    Fail,
    /// Keep the stored row untouched when a row with the same assigned key
    /// exists. Any other constraint failure is still an error.
    KeepExisting,
}

pub(crate) fn select_all(conn: &Connection, descriptor: &EntityDescriptor) -> RepoResult<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM \"{}\" ORDER BY rowid;",
        column_list(descriptor.fields, None),
        descriptor.name
    ))?;
    let rows = stmt.query([])?;
    read_records(rows, descriptor)
}

pub(crate) fn select_by_key(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    key: &EntityKey,
) -> RepoResult<Option<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM \"{}\" WHERE \"{}\" = ?1;",
        column_list(descriptor.fields, None),
        descriptor.name,
        descriptor.key_column()
    ))?;
    let rows = stmt.query([key])?;
    Ok(read_records(rows, descriptor)?.into_iter().next())
}

/// Loads the members linked to `owner`, in link insertion order.
pub(crate) fn select_members(
    conn: &Connection,
    relationship: &RelationshipDescriptor,
    owner: &EntityKey,
) -> RepoResult<Vec<Record>> {
    let member = relationship.member_descriptor();
    let mut stmt = conn.prepare(&format!(
        "SELECT {}
         FROM \"{}\" m
         JOIN \"{}\" l ON l.\"{}\" = m.\"{}\"
         WHERE l.\"{}\" = ?1
         ORDER BY l.rowid;",
        column_list(member.fields, Some("m")),
        member.name,
        relationship.link_table,
        relationship.member_column,
        member.key_column(),
        relationship.owner_column
    ))?;
    let rows = stmt.query([owner])?;
    read_records(rows, member)
}

/// Inserts the scalar fields of `entity`.
///
/// Returns the row key and the number of rows written. Unassigned integer
/// keys are generated by SQLite and written back onto `entity`; those rows
/// are always inserted, whatever `conflict` says.
pub(crate) fn insert_row(
    conn: &Connection,
    descriptor: &'static EntityDescriptor,
    entity: &mut dyn FieldAccess,
    conflict: OnConflict,
) -> RepoResult<(EntityKey, usize)> {
    let key = resolve_key_erased(descriptor, entity)?;
    let generate = descriptor.has_generated_key() && key.is_unassigned();
    if !generate && conflict == OnConflict::KeepExisting && row_exists(conn, descriptor, &key)? {
        return Ok((key, 0));
    }

    let values: Vec<(&'static str, Value)> = snapshot_fields(descriptor, entity)?
        .into_iter()
        .filter(|(field, _)| !(generate && *field == descriptor.id_field))
        .collect();
    let sql = if values.is_empty() {
        format!("INSERT INTO \"{}\" DEFAULT VALUES;", descriptor.name)
    } else {
        let fields: Vec<&str> = values.iter().map(|(field, _)| *field).collect();
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({});",
            descriptor.name,
            column_list(&fields, None),
            placeholders(values.len(), 1)
        )
    };
    let written = conn.execute(&sql, params_from_iter(values.iter().map(|(_, value)| value)))?;

    if generate {
        let id = conn.last_insert_rowid();
        entity.set_field(descriptor.id_field, Value::Integer(id))?;
        return Ok((EntityKey::Integer(id), written));
    }
    Ok((key, written))
}

fn row_exists(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    key: &EntityKey,
) -> RepoResult<bool> {
    let found = conn
        .query_row(
            &format!(
                "SELECT 1 FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 1;",
                descriptor.name,
                descriptor.key_column()
            ),
            [key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Writes `values` onto the row identified by `key`.
///
/// # Errors
/// - `NotFound` when no row matched, e.g. it was deleted behind the context.
pub(crate) fn update_row(
    conn: &Connection,
    descriptor: &'static EntityDescriptor,
    key: &EntityKey,
    values: &[(&'static str, Value)],
) -> RepoResult<usize> {
    let assignments: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(index, (field, _))| format!("\"{field}\" = ?{}", index + 1))
        .collect();
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"{}\" = ?{};",
        descriptor.name,
        assignments.join(", "),
        descriptor.key_column(),
        values.len() + 1
    );
    let bound = values
        .iter()
        .map(|(_, value)| value.clone())
        .chain(std::iter::once(key.to_value()));
    let written = conn.execute(&sql, params_from_iter(bound))?;
    ensure_row_matched(descriptor, key, written)
}

pub(crate) fn delete_row(
    conn: &Connection,
    descriptor: &'static EntityDescriptor,
    key: &EntityKey,
) -> RepoResult<usize> {
    let written = conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1;",
            descriptor.name,
            descriptor.key_column()
        ),
        [key],
    )?;
    ensure_row_matched(descriptor, key, written)
}

pub(crate) fn insert_link(
    conn: &Connection,
    relationship: &RelationshipDescriptor,
    owner: &EntityKey,
    member: &EntityKey,
) -> RepoResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" (\"{}\", \"{}\") VALUES (?1, ?2);",
            relationship.link_table, relationship.owner_column, relationship.member_column
        ),
        params![owner, member],
    )?;
    Ok(())
}

pub(crate) fn delete_link(
    conn: &Connection,
    relationship: &RelationshipDescriptor,
    owner: &EntityKey,
    member: &EntityKey,
) -> RepoResult<()> {
    conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1 AND \"{}\" = ?2;",
            relationship.link_table, relationship.owner_column, relationship.member_column
        ),
        params![owner, member],
    )?;
    Ok(())
}

pub(crate) fn delete_links(
    conn: &Connection,
    relationship: &RelationshipDescriptor,
    owner: &EntityKey,
) -> RepoResult<()> {
    conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1;",
            relationship.link_table, relationship.owner_column
        ),
        [owner],
    )?;
    Ok(())
}

/// Key of a loaded row, read from the descriptor's key column.
pub(crate) fn record_key(descriptor: &'static EntityDescriptor, record: &Record) -> RepoResult<EntityKey> {
    let field = descriptor.key_column();
    record
        .iter()
        .find(|(name, _)| *name == field)
        .and_then(|(_, value)| EntityKey::from_value(value.clone()))
        .ok_or(RepoError::InvalidKey {
            entity: descriptor.name,
            field,
        })
}

/// Verifies that `descriptor`, its link tables and member tables exist.
pub(crate) fn ensure_mapped(conn: &Connection, descriptor: &'static EntityDescriptor) -> RepoResult<()> {
    ensure_table(conn, descriptor.name, descriptor.fields)?;
    for relationship in descriptor.relationships {
        ensure_table(
            conn,
            relationship.link_table,
            &[relationship.owner_column, relationship.member_column],
        )?;
        let member = relationship.member_descriptor();
        ensure_table(conn, member.name, member.fields)?;
    }
    Ok(())
}

fn ensure_table(conn: &Connection, table: &'static str, columns: &[&'static str]) -> RepoResult<()> {
    if !table_exists(conn, table)? {
        return Err(RepoError::MissingTable(table));
    }
    for &column in columns {
        if !table_has_column(conn, table, column)? {
            return Err(RepoError::MissingColumn { table, column });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn read_records(mut rows: Rows<'_>, descriptor: &EntityDescriptor) -> RepoResult<Vec<Record>> {
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(descriptor.fields.len());
        for (index, field) in descriptor.fields.iter().enumerate() {
            record.push((*field, row.get::<_, Value>(index)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn ensure_row_matched(
    descriptor: &'static EntityDescriptor,
    key: &EntityKey,
    written: usize,
) -> RepoResult<usize> {
    if written == 0 {
        return Err(RepoError::NotFound {
            entity: descriptor.name,
            key: key.clone(),
        });
    }
    Ok(written)
}

fn column_list(fields: &[&str], alias: Option<&str>) -> String {
    fields
        .iter()
        .map(|field| match alias {
            Some(alias) => format!("{alias}.\"{field}\""),
            None => format!("\"{field}\""),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{column_list, placeholders};

    #[test]
    fn columns_are_quoted_and_optionally_aliased() {
        assert_eq!(column_list(&["id", "name"], None), "\"id\", \"name\"");
        assert_eq!(column_list(&["id"], Some("m")), "m.\"id\"");
    }

    #[test]
    fn placeholders_are_numbered() {
        assert_eq!(placeholders(3, 1), "?1, ?2, ?3");
    }
}
