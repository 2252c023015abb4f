use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Database;
use crate::error::StoreError;
use crate::models::{Collection, Permissions, Row};
use crate::queries;
use crate::query::Query;
use crate::schema;

/// The document-store contract the chat core is written against.
///
/// Every call names the acting user; row permissions are enforced here, not
/// by callers. Multi-row writes are never transactional.
pub trait MessageStore: Send + Sync {
    fn create_row(
        &self,
        collection: Collection,
        id: Uuid,
        data: Map<String, Value>,
        permissions: Permissions,
    ) -> Result<Row, StoreError>;

    fn get_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<Row, StoreError>;

    /// Merge `patch` into the row's top-level fields; optionally replace its permissions.
    fn update_row(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Uuid,
        patch: Map<String, Value>,
        permissions: Option<Permissions>,
    ) -> Result<Row, StoreError>;

    fn delete_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<(), StoreError>;

    /// Rows matching `query` that `actor` may read.
    fn list_rows(&self, collection: Collection, actor: Uuid, query: &Query) -> Result<Vec<Row>, StoreError>;
}

impl MessageStore for Database {
    fn create_row(
        &self,
        collection: Collection,
        id: Uuid,
        data: Map<String, Value>,
        permissions: Permissions,
    ) -> Result<Row, StoreError> {
        schema::validate(collection, &data)?;
        let row = Row { collection, id, data, permissions };
        self.with_conn(|conn| queries::insert_row(conn, &row))?;
        Ok(row)
    }

    fn get_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<Row, StoreError> {
        let row = self
            .with_conn(|conn| queries::select_row(conn, collection, id))?
            .ok_or(StoreError::NotFound { collection: collection.name(), id })?;

        if !row.permissions.can_read(actor) {
            return Err(denied("read", collection, id));
        }
        Ok(row)
    }

    fn update_row(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Uuid,
        patch: Map<String, Value>,
        permissions: Option<Permissions>,
    ) -> Result<Row, StoreError> {
        self.with_conn(|conn| {
            let mut row = queries::select_row(conn, collection, id)?
                .ok_or(StoreError::NotFound { collection: collection.name(), id })?;
            if !row.permissions.can_update(actor) {
                return Err(denied("update", collection, id));
            }

            row.data.extend(patch);
            schema::validate(collection, &row.data)?;
            if let Some(permissions) = permissions {
                row.permissions = permissions;
            }

            queries::replace_row(conn, &row)?;
            Ok(row)
        })
    }

    fn delete_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let row = queries::select_row(conn, collection, id)?
                .ok_or(StoreError::NotFound { collection: collection.name(), id })?;
            if !row.permissions.can_delete(actor) {
                return Err(denied("delete", collection, id));
            }
            queries::remove_row(conn, collection, id)
        })
    }

    fn list_rows(&self, collection: Collection, actor: Uuid, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.with_conn(|conn| queries::select_rows(conn, collection, actor, query))
    }
}

fn denied(action: &'static str, collection: Collection, id: Uuid) -> StoreError {
    StoreError::PermissionDenied { action, collection: collection.name(), id }
}
