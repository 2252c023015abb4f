//! Versioned schema contract between the chat core and the store.
//!
//! Each collection declares the fields it can be queried on and the fields
//! every document must carry. Writes are checked against it; queries on
//! anything undeclared are refused.

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::models::Collection;

/// Version the migrations in `migrations.rs` bring a database to.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Compared with equal / less_than, usable for ordering.
    Scalar,
    /// JSON array, matched with contains / not_contains.
    Array,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn scalar(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Scalar }
}

const fn array(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Array }
}

const IDENTITY_FIELDS: &[FieldSpec] = &[scalar("userId"), scalar("createdAt")];

const CONVERSATION_FIELDS: &[FieldSpec] = &[
    array("participants"),
    scalar("type"),
    scalar("creatorId"),
    scalar("isEncrypted"),
    scalar("lastMessageAt"),
    scalar("createdAt"),
];

const MESSAGE_FIELDS: &[FieldSpec] = &[
    scalar("conversationId"),
    scalar("senderId"),
    scalar("type"),
    scalar("createdAt"),
    array("readBy"),
];

impl Collection {
    pub fn declared_fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Identities => IDENTITY_FIELDS,
            Self::Conversations => CONVERSATION_FIELDS,
            Self::Messages => MESSAGE_FIELDS,
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Identities => &["userId", "publicKey", "sealedPrivateKey", "sealedMasterKey", "kdfSalt", "createdAt"],
            Self::Conversations => &[
                "type",
                "participants",
                "creatorId",
                "isEncrypted",
                "encryptionVersion",
                "keyVersion",
                "createdAt",
            ],
            Self::Messages => &["conversationId", "senderId", "type", "content", "readBy", "createdAt"],
        }
    }

    pub fn field(&self, name: &str) -> Result<FieldSpec, StoreError> {
        self.declared_fields()
            .iter()
            .find(|f| f.name == name)
            .copied()
            .ok_or_else(|| StoreError::UndeclaredField {
                collection: self.name(),
                field: name.to_string(),
            })
    }
}

/// Check a full document against its collection's required fields.
pub fn validate(collection: Collection, data: &Map<String, Value>) -> Result<(), StoreError> {
    let missing: Vec<&str> = collection
        .required_fields()
        .iter()
        .filter(|f| data.get(**f).is_none_or(Value::is_null))
        .copied()
        .collect();

    if !missing.is_empty() {
        return Err(StoreError::SchemaViolation {
            collection: collection.name(),
            reason: format!("missing required fields: {}", missing.join(", ")),
        });
    }

    for spec in collection.declared_fields() {
        if spec.kind == FieldKind::Array {
            if let Some(value) = data.get(spec.name) {
                if !value.is_array() {
                    return Err(StoreError::SchemaViolation {
                        collection: collection.name(),
                        reason: format!("{} must be an array", spec.name),
                    });
                }
            }
        }
    }
    Ok(())
}
