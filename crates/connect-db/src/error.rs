use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Row not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: Uuid },

    #[error("Row already exists: {collection}/{id}")]
    AlreadyExists { collection: &'static str, id: Uuid },

    #[error("Permission denied: {action} on {collection}/{id}")]
    PermissionDenied { action: &'static str, collection: &'static str, id: Uuid },

    #[error("Field '{field}' is not declared on {collection}")]
    UndeclaredField { collection: &'static str, field: String },

    #[error("'{op}' is not valid on {collection}.{field}")]
    InvalidQuery { collection: &'static str, field: String, op: &'static str },

    #[error("Schema violation on {collection}: {reason}")]
    SchemaViolation { collection: &'static str, reason: String },

    #[error("Database schema v{found} is newer than supported v{supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
