//! The three deletion semantics.
//!
//! - footprint wipe: hard delete of every message one user authored in a
//!   conversation
//! - clear for me: a per-user watermark in the encrypted settings blob;
//!   nothing is deleted
//! - nuclear wipe: hard delete of every message, self-chats only
//!
//! Hard deletes list the target ids page by page first, then delete them in
//! bounded batches with bounded concurrency. A failed delete is recorded in
//! the report and the rest carry on.

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use connect_db::Query;
use connect_types::api::{DeletionReport, FailedDeletion};
use connect_types::models::{Conversation, ConversationSettings};

use crate::cipher::{ContentCipher, FieldKind};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::repo::Repo;

#[derive(Clone)]
pub struct RetentionController {
    repo: Repo,
    cipher: ContentCipher,
    batch_size: usize,
    concurrency: usize,
}

impl RetentionController {
    pub fn new(repo: Repo, cipher: ContentCipher, config: &CoreConfig) -> Self {
        Self {
            repo,
            cipher,
            batch_size: config.delete_batch_size.max(1),
            concurrency: config.delete_concurrency.max(1),
        }
    }

    /// Hard-delete every message `user_id` sent in the conversation. Other
    /// participants' messages and the settings blob are left alone.
    pub async fn wipe_my_footprint(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DeletionReport, CoreError> {
        let conversation = self.repo.get_conversation(conversation_id, user_id).await?;
        ensure_member(&conversation, user_id)?;

        let query = Query::new()
            .equal("conversationId", conversation_id.to_string())
            .equal("senderId", user_id.to_string());
        let ids = self.collect_ids(user_id, query).await?;
        let report = self.delete_batched(user_id, ids).await;

        info!(
            "Footprint wipe of user {} in conversation {}: {}/{} deleted, {} failed",
            user_id,
            conversation_id,
            report.deleted,
            report.requested,
            report.failed.len()
        );
        Ok(report)
    }

    /// Move `user_id`'s clear watermark to now. Rows are untouched and stay
    /// readable by everyone else. Returns the watermark in effect.
    pub async fn clear_chat_for_me(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DateTime<Utc>, CoreError> {
        let mut conversation = self.repo.get_conversation(conversation_id, user_id).await?;
        ensure_member(&conversation, user_id)?;

        let mut settings = self.settings(&conversation)?;
        let mark = settings.advance_watermark(user_id, crate::now());

        let (sealed, _) = self
            .cipher
            .seal(&conversation, FieldKind::Settings, &serde_json::to_string(&settings)?)?;
        conversation.settings_ciphertext = Some(sealed);
        conversation.updated_at = crate::now();
        self.repo
            .update_conversation(&conversation, user_id, &["settingsCiphertext", "updatedAt"])
            .await?;

        info!("Cleared conversation {} for user {}", conversation_id, user_id);
        Ok(mark)
    }

    /// Delete every message in a self-chat. Anything with more than one
    /// participant, or not owned by the caller, is refused before a single
    /// message row is read or written.
    pub async fn nuclear_wipe(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DeletionReport, CoreError> {
        let conversation = self.repo.get_conversation(conversation_id, user_id).await?;
        if !(conversation.is_self_chat() && conversation.has_participant(user_id)) {
            warn!(
                "Refused nuclear wipe of conversation {} ({} participants) by user {}",
                conversation_id,
                conversation.participants.len(),
                user_id
            );
            return Err(CoreError::PolicyViolation(format!(
                "nuclear wipe is reserved for self-chats; conversation {} has {} participants",
                conversation_id,
                conversation.participants.len()
            )));
        }

        let query = Query::new().equal("conversationId", conversation_id.to_string());
        let ids = self.collect_ids(user_id, query).await?;
        let report = self.delete_batched(user_id, ids).await;

        info!(
            "Nuclear wipe of conversation {}: {}/{} deleted, {} failed",
            conversation_id,
            report.deleted,
            report.requested,
            report.failed.len()
        );
        Ok(report)
    }

    /// Decrypted settings blob; a conversation without one has defaults.
    pub fn settings(&self, conversation: &Conversation) -> Result<ConversationSettings, CoreError> {
        match &conversation.settings_ciphertext {
            None => Ok(ConversationSettings::default()),
            Some(stored) => {
                let json = self.cipher.open(
                    conversation,
                    ContentCipher::metadata_version(conversation),
                    FieldKind::Settings,
                    stored,
                )?;
                Ok(serde_json::from_str(&json)?)
            }
        }
    }

    /// The caller's clear watermark, if it can be read. An unreadable
    /// settings blob means no filtering; the messages it would hide are
    /// unreadable for the same reason.
    pub fn watermark(&self, conversation: &Conversation, user_id: Uuid) -> Option<DateTime<Utc>> {
        match self.settings(conversation) {
            Ok(settings) => settings.watermark(user_id),
            Err(e) => {
                debug!("Settings of conversation {} unreadable: {}", conversation.id, e);
                None
            }
        }
    }

    async fn collect_ids(&self, actor: Uuid, query: Query) -> Result<Vec<Uuid>, CoreError> {
        let page = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        let mut ids = Vec::new();

        loop {
            let offset = u32::try_from(ids.len()).unwrap_or(u32::MAX);
            let batch = self
                .repo
                .list_messages(actor, query.clone().order_asc("createdAt").limit(page).offset(offset))
                .await?;
            let fetched = batch.len();
            ids.extend(batch.into_iter().map(|m| m.id));
            if fetched < self.batch_size {
                break;
            }
        }
        Ok(ids)
    }

    async fn delete_batched(&self, actor: Uuid, ids: Vec<Uuid>) -> DeletionReport {
        let mut report = DeletionReport {
            requested: ids.len(),
            ..Default::default()
        };

        for batch in ids.chunks(self.batch_size) {
            let results: Vec<(Uuid, Result<(), CoreError>)> = stream::iter(batch.iter().copied())
                .map(|id| async move { (id, self.repo.delete_message(id, actor).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (id, result) in results {
                match result {
                    // Already gone counts as deleted
                    Ok(()) | Err(CoreError::MessageNotFound(_)) => report.deleted += 1,
                    Err(e) => {
                        warn!("Failed to delete message {}: {}", id, e);
                        report.failed.push(FailedDeletion {
                            message_id: id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        report
    }
}

fn ensure_member(conversation: &Conversation, user_id: Uuid) -> Result<(), CoreError> {
    if conversation.has_participant(user_id) {
        Ok(())
    } else {
        Err(CoreError::PermissionDenied(format!(
            "user {} is not a participant of conversation {}",
            user_id, conversation.id
        )))
    }
}
