use rusqlite::{Connection, ErrorCode, OptionalExtension, params_from_iter};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Collection, Permissions, Role, Row};
use crate::query::Query;

/// Row columns as stored, before JSON decoding.
struct RawRow {
    id: String,
    data: String,
    read: String,
    update: String,
    delete: String,
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        data: row.get(1)?,
        read: row.get(2)?,
        update: row.get(3)?,
        delete: row.get(4)?,
    })
}

fn decode(collection: Collection, raw: RawRow) -> Result<Row, StoreError> {
    let id = raw.id.parse::<Uuid>().map_err(|e| StoreError::SchemaViolation {
        collection: collection.name(),
        reason: format!("corrupt row id '{}': {}", raw.id, e),
    })?;
    let data: Map<String, Value> = serde_json::from_str(&raw.data)?;
    Ok(Row {
        collection,
        id,
        data,
        permissions: Permissions {
            read: decode_roles(&raw.read)?,
            update: decode_roles(&raw.update)?,
            delete: decode_roles(&raw.delete)?,
        },
    })
}

fn decode_roles(json: &str) -> Result<Vec<Role>, StoreError> {
    let tags: Vec<String> = serde_json::from_str(json)?;
    Ok(tags
        .iter()
        .filter_map(|tag| {
            let role = Role::from_tag(tag);
            if role.is_none() {
                warn!("Ignoring unknown permission role '{}'", tag);
            }
            role
        })
        .collect())
}

fn encode_roles(roles: &[Role]) -> Result<String, StoreError> {
    let tags: Vec<String> = roles.iter().map(Role::tag).collect();
    Ok(serde_json::to_string(&tags)?)
}

pub(crate) fn insert_row(conn: &Connection, row: &Row) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO rows (collection, id, data, read_perms, update_perms, delete_perms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            row.collection.name(),
            row.id.to_string(),
            serde_json::to_string(&row.data)?,
            encode_roles(&row.permissions.read)?,
            encode_roles(&row.permissions.update)?,
            encode_roles(&row.permissions.delete)?,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::AlreadyExists {
                collection: row.collection.name(),
                id: row.id,
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn select_row(conn: &Connection, collection: Collection, id: Uuid) -> Result<Option<Row>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, data, read_perms, update_perms, delete_perms FROM rows
             WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection.name(), id.to_string()],
            raw_row,
        )
        .optional()?;

    raw.map(|r| decode(collection, r)).transpose()
}

pub(crate) fn replace_row(conn: &Connection, row: &Row) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE rows SET data = ?3, read_perms = ?4, update_perms = ?5, delete_perms = ?6
         WHERE collection = ?1 AND id = ?2",
        rusqlite::params![
            row.collection.name(),
            row.id.to_string(),
            serde_json::to_string(&row.data)?,
            encode_roles(&row.permissions.read)?,
            encode_roles(&row.permissions.update)?,
            encode_roles(&row.permissions.delete)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn remove_row(conn: &Connection, collection: Collection, id: Uuid) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM rows WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection.name(), id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn select_rows(
    conn: &Connection,
    collection: Collection,
    actor: Uuid,
    query: &Query,
) -> Result<Vec<Row>, StoreError> {
    let (sql, params) = query.to_sql(collection, actor)?;
    let mut stmt = conn.prepare(&sql)?;

    let raws = stmt
        .query_map(params_from_iter(params.iter()), raw_row)?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter().map(|r| decode(collection, r)).collect()
}
