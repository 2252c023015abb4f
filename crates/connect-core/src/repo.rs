//! Typed, timeout-bound access to the message store.
//!
//! Store calls are blocking; each one runs on the blocking pool under
//! `store_timeout`. A call that times out keeps running to completion in the
//! background, but the caller sees `StoreUnavailable` and moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{error, warn};
use uuid::Uuid;

use connect_db::{Collection, MessageStore, Permissions, Query, Row, StoreError};
use connect_types::models::{Conversation, Identity, Message};

use crate::error::CoreError;

#[derive(Clone)]
pub struct Repo {
    store: Arc<dyn MessageStore>,
    timeout: Duration,
}

impl Repo {
    pub fn new(store: Arc<dyn MessageStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&dyn MessageStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(CoreError::from),
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(CoreError::StoreUnavailable(format!("store task failed: {}", e)))
            }
            Err(_) => {
                warn!("Store call timed out after {:?}", self.timeout);
                Err(CoreError::StoreUnavailable(format!("store call timed out after {:?}", self.timeout)))
            }
        }
    }

    // -- Identities --

    pub async fn insert_identity(&self, identity: &Identity) -> Result<(), CoreError> {
        let data = to_document(identity)?;
        let user_id = identity.user_id;
        self.call(move |s| s.create_row(Collection::Identities, user_id, data, Permissions::public_read(user_id)))
            .await?;
        Ok(())
    }

    pub async fn get_identity(&self, user_id: Uuid) -> Result<Identity, CoreError> {
        let row = self
            .call(move |s| s.get_row(Collection::Identities, user_id, user_id))
            .await?;
        from_row(row)
    }

    // -- Conversations --

    pub async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), CoreError> {
        let data = to_document(conversation)?;
        let id = conversation.id;
        let permissions = conversation_permissions(conversation);
        self.call(move |s| s.create_row(Collection::Conversations, id, data, permissions))
            .await?;
        Ok(())
    }

    pub async fn get_conversation(&self, id: Uuid, actor: Uuid) -> Result<Conversation, CoreError> {
        let row = self
            .call(move |s| s.get_row(Collection::Conversations, id, actor))
            .await?;
        from_row(row)
    }

    /// Write the named top-level fields of `conversation`. Passing
    /// `"participants"` also resets the row permissions to the new member set.
    pub async fn update_conversation(
        &self,
        conversation: &Conversation,
        actor: Uuid,
        fields: &[&str],
    ) -> Result<Conversation, CoreError> {
        let patch = patch_of(conversation, fields)?;
        let permissions = fields
            .contains(&"participants")
            .then(|| conversation_permissions(conversation));
        let id = conversation.id;

        let row = self
            .call(move |s| s.update_row(Collection::Conversations, id, actor, patch, permissions))
            .await?;
        from_row(row)
    }

    pub async fn list_conversations(&self, actor: Uuid, query: Query) -> Result<Vec<Conversation>, CoreError> {
        let rows = self
            .call(move |s| s.list_rows(Collection::Conversations, actor, &query))
            .await?;
        Ok(parse_rows(rows))
    }

    // -- Messages --

    pub async fn insert_message(&self, message: &Message, readers: &Conversation) -> Result<(), CoreError> {
        let data = to_document(message)?;
        let id = message.id;
        let permissions = Permissions::members(readers.participants.iter().copied(), message.sender_id);
        self.call(move |s| s.create_row(Collection::Messages, id, data, permissions))
            .await?;
        Ok(())
    }

    pub async fn get_message(&self, id: Uuid, actor: Uuid) -> Result<Message, CoreError> {
        let row = self.call(move |s| s.get_row(Collection::Messages, id, actor)).await?;
        from_row(row)
    }

    pub async fn update_message(&self, message: &Message, actor: Uuid, fields: &[&str]) -> Result<Message, CoreError> {
        let patch = patch_of(message, fields)?;
        let id = message.id;
        let row = self
            .call(move |s| s.update_row(Collection::Messages, id, actor, patch, None))
            .await?;
        from_row(row)
    }

    pub async fn delete_message(&self, id: Uuid, actor: Uuid) -> Result<(), CoreError> {
        self.call(move |s| s.delete_row(Collection::Messages, id, actor)).await
    }

    pub async fn list_messages(&self, actor: Uuid, query: Query) -> Result<Vec<Message>, CoreError> {
        let rows = self
            .call(move |s| s.list_rows(Collection::Messages, actor, &query))
            .await?;
        Ok(parse_rows(rows))
    }
}

fn conversation_permissions(conversation: &Conversation) -> Permissions {
    Permissions::members(conversation.participants.iter().copied(), conversation.creator_id)
}

fn to_document<T: Serialize>(value: &T) -> Result<Map<String, Value>, CoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::SchemaViolation(format!("expected a JSON object, got {}", other))),
    }
}

fn patch_of<T: Serialize>(value: &T, fields: &[&str]) -> Result<Map<String, Value>, CoreError> {
    let mut document = to_document(value)?;
    Ok(fields
        .iter()
        .map(|f| (f.to_string(), document.remove(*f).unwrap_or(Value::Null)))
        .collect())
}

/// Decode listed rows, skipping any that no longer match the model.
fn parse_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match from_row(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping malformed row: {}", e);
                None
            }
        })
        .collect()
}

fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, CoreError> {
    let (collection, id) = (row.collection, row.id);
    serde_json::from_value(Value::Object(row.data)).map_err(|e| {
        CoreError::SchemaViolation(format!("{} row {} does not match its model: {}", collection.name(), id, e))
    })
}
