use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema::SCHEMA_VERSION;

/// Ordered migrations; the database's `user_version` records the last applied.
const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        "
        CREATE TABLE IF NOT EXISTS rows (
            collection    TEXT NOT NULL,
            id            TEXT NOT NULL,
            data          TEXT NOT NULL,
            read_perms    TEXT NOT NULL DEFAULT '[]',
            update_perms  TEXT NOT NULL DEFAULT '[]',
            delete_perms  TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (collection, id)
        );
        ",
    ),
    (
        2,
        "
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON rows (json_extract(data, '$.conversationId'), json_extract(data, '$.createdAt'))
            WHERE collection = 'messages';

        -- readBy became required in v2
        UPDATE rows
            SET data = json_set(data, '$.readBy', json('[]'))
            WHERE collection = 'messages' AND json_type(data, '$.readBy') IS NULL;
        ",
    ),
];

/// Bring the database up to `SCHEMA_VERSION`. Returns the resulting version.
pub fn run(conn: &Connection) -> Result<u32, StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!("Applied schema migration v{}", version);
    }

    info!("Database migrations complete (schema v{})", SCHEMA_VERSION);
    Ok(SCHEMA_VERSION)
}
