//! The chat-service facade: every operation the UI layer calls.
//!
//! A `ChatService` acts for exactly one user, the owner of its vault. Any
//! operation that names a user id must name that user.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use connect_db::{MessageStore, Query};
use connect_types::api::{
    Content, ConversationView, CreatedConversation, DeletionReport, MessageView, SendMessageRequest, WrapReport,
};
use connect_types::models::{Conversation, ConversationKind, ENCRYPTION_VERSION, Message, MessageKind};
use connect_types::signal::CallSignal;

use crate::cipher::{ContentCipher, FieldKind, encrypt_field};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::identity::IdentityKeyStore;
use crate::keys::ConversationKeyManager;
use crate::repo::Repo;
use crate::retention::RetentionController;
use crate::vault::Vault;

/// Characters of a text message kept in the conversation preview.
const PREVIEW_CHARS: usize = 100;

/// Messages marked read per `mark_conversation_read` call.
const MARK_READ_LIMIT: u32 = 100;

/// Newest messages searched for a new preview after a delete.
const PREVIEW_SCAN_LIMIT: u32 = 20;

pub struct ChatService {
    config: CoreConfig,
    repo: Repo,
    identities: IdentityKeyStore,
    vault: Vault,
    keys: ConversationKeyManager,
    cipher: ContentCipher,
    retention: RetentionController,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>, vault: Vault, config: CoreConfig) -> Self {
        let repo = Repo::new(store, config.store_timeout);
        let identities = IdentityKeyStore::with_repo(repo.clone(), &config);
        let keys = ConversationKeyManager::new(identities.clone(), vault.clone());
        let cipher = ContentCipher::new(keys.clone());
        let retention = RetentionController::new(repo.clone(), cipher.clone(), &config);

        Self {
            config,
            repo,
            identities,
            vault,
            keys,
            cipher,
            retention,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.vault.owner()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn identities(&self) -> &IdentityKeyStore {
        &self.identities
    }

    pub async fn unlock(&self, passphrase: &str) -> Result<(), CoreError> {
        self.vault.unlock(passphrase).await
    }

    /// Lock the vault. Cached conversation keys are destroyed with it.
    pub fn lock(&self) {
        self.vault.lock();
    }

    fn ensure_self(&self, user_id: Uuid) -> Result<(), CoreError> {
        if user_id == self.user_id() {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!("session for {} cannot act as {}", self.user_id(), user_id)))
        }
    }

    async fn load_conversation(&self, conversation_id: Uuid) -> Result<Conversation, CoreError> {
        let me = self.user_id();
        let conversation = self.repo.get_conversation(conversation_id, me).await?;
        if !conversation.has_participant(me) {
            return Err(CoreError::PermissionDenied(format!(
                "user {} is not a participant of conversation {}",
                me, conversation_id
            )));
        }
        Ok(conversation)
    }

    // -- Conversations --

    /// Start a conversation. The caller is always a participant; a direct
    /// conversation with only the caller is a self-chat.
    pub async fn create_conversation(
        &self,
        participants: BTreeSet<Uuid>,
        kind: ConversationKind,
        name: Option<&str>,
        encrypted: bool,
    ) -> Result<CreatedConversation, CoreError> {
        let me = self.user_id();
        let mut participants = participants;
        participants.insert(me);
        if kind == ConversationKind::Direct && participants.len() > 2 {
            return Err(CoreError::InvalidInput("a direct conversation has at most two participants".into()));
        }

        let now = crate::now();
        let id = Uuid::new_v4();
        let mut conversation = Conversation {
            id,
            kind,
            participants,
            admins: BTreeSet::from([me]),
            creator_id: me,
            is_encrypted: encrypted,
            encryption_version: 0,
            key_version: 0,
            wrapped_keys: BTreeMap::new(),
            key_history: BTreeMap::new(),
            name_ciphertext: name.map(str::to_owned),
            last_message_preview_ciphertext: None,
            last_message_id: None,
            last_message_at: None,
            settings_ciphertext: None,
            contains_plaintext: false,
            created_at: now,
            updated_at: now,
        };

        let mut unreadable = BTreeMap::new();
        if encrypted {
            let minted = self.keys.create_conversation_key(id, &conversation.participants).await;
            conversation.encryption_version = ENCRYPTION_VERSION;
            conversation.key_version = minted.version;
            conversation.name_ciphertext = name
                .map(|n| encrypt_field(&minted.key, FieldKind::ConversationName, n))
                .transpose()?;
            if minted.wrapped.contains_key(&me) {
                self.keys.remember(id, minted.version, &minted.key);
            }
            conversation.wrapped_keys = minted.wrapped;
            unreadable = minted.report.unreadable;
        }

        self.repo.insert_conversation(&conversation).await?;

        info!(
            "Created {} conversation {} with {} participants (encrypted: {}, unwrapped for {})",
            kind.as_str(),
            id,
            conversation.participants.len(),
            encrypted,
            unreadable.len()
        );
        Ok(CreatedConversation { conversation, unreadable })
    }

    /// Encrypted conversation with `participants` plus the caller: direct for
    /// two or fewer, group otherwise.
    pub async fn create_encrypted_conversation(
        &self,
        participants: BTreeSet<Uuid>,
    ) -> Result<CreatedConversation, CoreError> {
        let mut everyone = participants;
        everyone.insert(self.user_id());
        let kind = if everyone.len() <= 2 {
            ConversationKind::Direct
        } else {
            ConversationKind::Group
        };
        self.create_conversation(everyone, kind, None, true).await
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Result<ConversationView, CoreError> {
        let conversation = self.load_conversation(conversation_id).await?;
        Ok(self.conversation_view(&conversation))
    }

    /// Every conversation the user is in, most recent activity first.
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationView>, CoreError> {
        self.ensure_self(user_id)?;
        let query = Query::new()
            .contains("participants", user_id.to_string())
            .order_desc("lastMessageAt");
        let conversations = self.repo.list_conversations(user_id, query).await?;
        Ok(conversations.iter().map(|c| self.conversation_view(c)).collect())
    }

    fn conversation_view(&self, conversation: &Conversation) -> ConversationView {
        let version = ContentCipher::metadata_version(conversation);
        let reveal = |kind, stored: &Option<String>| {
            stored
                .as_deref()
                .map(|s| self.cipher.reveal(conversation, version, kind, s))
        };

        ConversationView {
            id: conversation.id,
            kind: conversation.kind,
            participants: conversation.participants.clone(),
            name: reveal(FieldKind::ConversationName, &conversation.name_ciphertext),
            last_message_preview: reveal(FieldKind::LastMessagePreview, &conversation.last_message_preview_ciphertext),
            last_message_at: conversation.last_message_at,
            is_encrypted: conversation.is_encrypted,
            key_version: conversation.key_version,
            unreadable_participants: if conversation.is_encrypted {
                conversation.unwrapped_participants()
            } else {
                Vec::new()
            },
        }
    }

    // -- Messages --

    /// Seal and store a message, then point the conversation preview at it.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<MessageView, CoreError> {
        self.send_message_with(conversation_id, sender_id, SendMessageRequest::new(content, kind))
            .await
    }

    /// `send_message` with attachment references and an optional reply
    /// target, which must be a message in the same conversation.
    pub async fn send_message_with(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<MessageView, CoreError> {
        self.ensure_self(sender_id)?;
        if request.kind == MessageKind::Text && request.content.trim().is_empty() && request.attachments.is_empty() {
            return Err(CoreError::InvalidInput("message content is empty".into()));
        }
        if request.attachments.iter().any(|a| a.trim().is_empty()) {
            return Err(CoreError::InvalidInput("attachment reference is empty".into()));
        }
        let conversation = self.load_conversation(conversation_id).await?;
        if let Some(reply_to) = request.reply_to {
            self.ensure_reply_target(conversation_id, reply_to).await?;
        }
        self.post(conversation, request).await
    }

    async fn ensure_reply_target(&self, conversation_id: Uuid, reply_to: Uuid) -> Result<(), CoreError> {
        let target = match self.repo.get_message(reply_to, self.user_id()).await {
            Ok(message) => message,
            Err(CoreError::MessageNotFound(_)) => {
                return Err(CoreError::InvalidInput(format!("reply target {} does not exist", reply_to)));
            }
            Err(e) => return Err(e),
        };
        if target.conversation_id != conversation_id {
            return Err(CoreError::InvalidInput(format!("reply target {} belongs to another conversation", reply_to)));
        }
        Ok(())
    }

    /// Relay an opaque call-signalling payload through the conversation. It
    /// is sealed like any message body but never becomes the preview.
    pub async fn relay_call_signal(
        &self,
        conversation_id: Uuid,
        signal: &CallSignal,
    ) -> Result<MessageView, CoreError> {
        let conversation = self.load_conversation(conversation_id).await?;
        let request = SendMessageRequest::new(signal.to_content()?, MessageKind::CallSignal);
        self.post(conversation, request).await
    }

    async fn post(
        &self,
        mut conversation: Conversation,
        request: SendMessageRequest,
    ) -> Result<MessageView, CoreError> {
        let me = self.user_id();
        let now = crate::now();
        let SendMessageRequest {
            content,
            kind,
            attachments,
            reply_to,
        } = request;
        let content = content.as_str();

        let (body, key_version) = match self.cipher.seal(&conversation, FieldKind::MessageBody, content) {
            Ok(sealed) => sealed,
            Err(CoreError::VaultLocked) if self.config.plaintext_fallback => {
                warn!(
                    "Vault locked; storing plaintext message in encrypted conversation {}",
                    conversation.id
                );
                if !conversation.contains_plaintext {
                    // Flag first so a plaintext row never sits in an unflagged conversation
                    conversation.contains_plaintext = true;
                    conversation.updated_at = now;
                    conversation = self
                        .repo
                        .update_conversation(&conversation, me, &["containsPlaintext", "updatedAt"])
                        .await?;
                }
                (content.to_owned(), None)
            }
            Err(e) => return Err(e),
        };
        // Attachments follow the body: sealed under the same key, or plaintext with it
        let stored_attachments = match key_version {
            Some(_) => attachments
                .iter()
                .map(|a| self.cipher.seal(&conversation, FieldKind::Attachment, a).map(|(sealed, _)| sealed))
                .collect::<Result<Vec<_>, _>>()?,
            None => attachments.clone(),
        };

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            sender_id: me,
            kind,
            content: body,
            key_version,
            attachments: stored_attachments,
            reply_to,
            read_by: BTreeSet::from([me]),
            created_at: now,
            updated_at: now,
        };

        // The message row must exist before anything points at it
        self.repo.insert_message(&message, &conversation).await?;
        debug!("Stored message {} in conversation {}", message.id, conversation.id);

        if kind != MessageKind::CallSignal {
            if let Err(e) = self.update_preview(&mut conversation, &message, content).await {
                warn!(
                    "Message {} stored but preview of conversation {} not updated: {}",
                    message.id, conversation.id, e
                );
            }
        }

        Ok(MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content: Content::Plain(content.to_owned()),
            attachments: attachments.into_iter().map(Content::Plain).collect(),
            reply_to: message.reply_to,
            read_by: message.read_by,
            created_at: message.created_at,
        })
    }

    async fn update_preview(
        &self,
        conversation: &mut Conversation,
        message: &Message,
        content: &str,
    ) -> Result<(), CoreError> {
        let preview = preview_text(message.kind, content);
        conversation.last_message_preview_ciphertext = match (conversation.is_encrypted, message.key_version) {
            // A plaintext fallback message gets no preview rather than a plaintext one
            (true, None) => None,
            _ => Some(self.cipher.seal(conversation, FieldKind::LastMessagePreview, &preview)?.0),
        };
        conversation.last_message_id = Some(message.id);
        conversation.last_message_at = Some(message.created_at);
        conversation.updated_at = message.created_at;

        self.repo
            .update_conversation(
                conversation,
                self.user_id(),
                &["lastMessagePreviewCiphertext", "lastMessageId", "lastMessageAt", "updatedAt"],
            )
            .await?;
        Ok(())
    }

    /// The latest page of messages, oldest first.
    pub async fn read_messages(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Vec<MessageView>, CoreError> {
        self.read_messages_page(conversation_id, user_id, self.config.page_size, 0)
            .await
    }

    /// `limit` messages skipping the newest `offset`, returned oldest first.
    /// Messages before the caller's clear watermark are left out; anything
    /// that cannot be decrypted is returned with an `Unreadable` body.
    pub async fn read_messages_page(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageView>, CoreError> {
        self.ensure_self(user_id)?;
        let conversation = self.load_conversation(conversation_id).await?;
        let watermark = self.retention.watermark(&conversation, user_id);

        let query = Query::new()
            .equal("conversationId", conversation_id.to_string())
            .order_desc("createdAt")
            .limit(limit)
            .offset(offset);
        let mut messages = self.repo.list_messages(user_id, query).await?;
        messages.reverse();

        Ok(messages
            .into_iter()
            .filter(|m| watermark.is_none_or(|mark| m.created_at >= mark))
            .map(|m| self.message_view(&conversation, m))
            .collect())
    }

    fn message_view(&self, conversation: &Conversation, message: Message) -> MessageView {
        let content = self
            .cipher
            .reveal(conversation, message.key_version, FieldKind::MessageBody, &message.content);
        let attachments = message
            .attachments
            .iter()
            .map(|a| self.cipher.reveal(conversation, message.key_version, FieldKind::Attachment, a))
            .collect();
        MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content,
            attachments,
            reply_to: message.reply_to,
            read_by: message.read_by,
            created_at: message.created_at,
        }
    }

    /// Hard-delete one message. Only its sender may. If it was the
    /// conversation's last message, the preview moves to the newest one left.
    pub async fn delete_message(&self, message_id: Uuid) -> Result<(), CoreError> {
        let me = self.user_id();
        let message = self.repo.get_message(message_id, me).await?;
        if message.sender_id != me {
            return Err(CoreError::PermissionDenied(format!("only the sender can delete message {}", message_id)));
        }
        self.repo.delete_message(message_id, me).await?;
        info!("Deleted message {} from conversation {}", message_id, message.conversation_id);

        let mut conversation = self.load_conversation(message.conversation_id).await?;
        if conversation.last_message_id == Some(message_id) {
            if let Err(e) = self.repoint_preview(&mut conversation).await {
                warn!(
                    "Message {} deleted but preview of conversation {} not moved: {}",
                    message_id, conversation.id, e
                );
            }
        }
        Ok(())
    }

    async fn repoint_preview(&self, conversation: &mut Conversation) -> Result<(), CoreError> {
        let query = Query::new()
            .equal("conversationId", conversation.id.to_string())
            .order_desc("createdAt")
            .limit(PREVIEW_SCAN_LIMIT);
        let latest = self
            .repo
            .list_messages(self.user_id(), query)
            .await?
            .into_iter()
            .find(|m| m.kind != MessageKind::CallSignal);

        let Some(message) = latest else {
            conversation.last_message_preview_ciphertext = None;
            conversation.last_message_id = None;
            conversation.updated_at = crate::now();
            self.repo
                .update_conversation(
                    conversation,
                    self.user_id(),
                    &["lastMessagePreviewCiphertext", "lastMessageId", "updatedAt"],
                )
                .await?;
            return Ok(());
        };

        let content = self
            .cipher
            .open(conversation, message.key_version, FieldKind::MessageBody, &message.content)?;
        self.update_preview(conversation, &message, &content).await
    }

    /// Add the caller to a message's `readBy`. Returns false if already there.
    pub async fn mark_as_read(&self, message_id: Uuid) -> Result<bool, CoreError> {
        let me = self.user_id();
        let mut message = self.repo.get_message(message_id, me).await?;
        if !message.read_by.insert(me) {
            return Ok(false);
        }
        message.updated_at = crate::now();
        self.repo.update_message(&message, me, &["readBy", "updatedAt"]).await?;
        Ok(true)
    }

    /// Mark up to `MARK_READ_LIMIT` unread messages read. Returns how many
    /// were marked.
    pub async fn mark_conversation_read(&self, conversation_id: Uuid) -> Result<usize, CoreError> {
        let me = self.user_id();
        self.load_conversation(conversation_id).await?;

        let query = Query::new()
            .equal("conversationId", conversation_id.to_string())
            .not_contains("readBy", me.to_string())
            .limit(MARK_READ_LIMIT);
        let unread = self.repo.list_messages(me, query).await?;

        let mut marked = 0;
        for mut message in unread {
            message.read_by.insert(me);
            message.updated_at = crate::now();
            match self.repo.update_message(&message, me, &["readBy", "updatedAt"]).await {
                Ok(_) => marked += 1,
                Err(e) => warn!("Failed to mark message {} read: {}", message.id, e),
            }
        }
        Ok(marked)
    }

    // -- Membership and keys --

    /// Add a participant and wrap the current key for them. Their earlier
    /// history stays out of reach: row permissions were fixed at send time.
    pub async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<WrapReport, CoreError> {
        let me = self.user_id();
        let mut conversation = self.load_conversation(conversation_id).await?;
        if conversation.has_participant(user_id) {
            return Err(CoreError::InvalidInput(format!(
                "user {} is already a participant of conversation {}",
                user_id, conversation_id
            )));
        }
        if conversation.kind == ConversationKind::Direct && conversation.participants.len() >= 2 {
            return Err(CoreError::InvalidInput("a direct conversation has at most two participants".into()));
        }

        let mut report = WrapReport::default();
        if conversation.is_encrypted {
            let key = self.keys.unwrap_for_self(&conversation, conversation.key_version)?;
            match self
                .keys
                .wrap_for(conversation_id, conversation.key_version, &key, user_id)
                .await
            {
                Ok(entry) => {
                    conversation.wrapped_keys.insert(user_id, entry);
                    report.wrapped.insert(user_id);
                }
                Err(e) => {
                    warn!("Added user {} to conversation {} without a key: {}", user_id, conversation_id, e);
                    report.unreadable.insert(user_id, e.to_string());
                }
            }
        }

        conversation.participants.insert(user_id);
        conversation.updated_at = crate::now();
        self.repo
            .update_conversation(&conversation, me, &["participants", "wrappedKeys", "updatedAt"])
            .await?;

        info!("Added user {} to conversation {}", user_id, conversation_id);
        Ok(report)
    }

    /// Remove a participant and their wrapped key entry. The key is not
    /// rotated; call `rotate_conversation_key` to cut them off from anything
    /// sent afterwards.
    pub async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), CoreError> {
        let me = self.user_id();
        let mut conversation = self.load_conversation(conversation_id).await?;
        if !conversation.has_participant(user_id) {
            return Err(CoreError::InvalidInput(format!(
                "user {} is not a participant of conversation {}",
                user_id, conversation_id
            )));
        }
        if user_id != me && !conversation.admins.contains(&me) {
            return Err(CoreError::PermissionDenied("only admins can remove other participants".into()));
        }
        if conversation.participants.len() == 1 {
            return Err(CoreError::InvalidInput("cannot remove the last participant".into()));
        }

        conversation.participants.remove(&user_id);
        conversation.admins.remove(&user_id);
        conversation.wrapped_keys.remove(&user_id);
        conversation.updated_at = crate::now();
        self.repo
            .update_conversation(&conversation, me, &["participants", "admins", "wrappedKeys", "updatedAt"])
            .await?;

        info!(
            "Removed user {} from conversation {} (key v{} not rotated)",
            user_id, conversation_id, conversation.key_version
        );
        Ok(())
    }

    /// Replace the conversation key with a new version wrapped for the
    /// current participants. Metadata is re-sealed under the new key; old
    /// messages stay under the old one, reachable through `keyHistory`.
    pub async fn rotate_conversation_key(&self, conversation_id: Uuid) -> Result<WrapReport, CoreError> {
        let me = self.user_id();
        let mut conversation = self.load_conversation(conversation_id).await?;
        if !conversation.is_encrypted {
            return Err(CoreError::InvalidInput(format!("conversation {} is not encrypted", conversation_id)));
        }

        let old_version = conversation.key_version;
        let open = |kind, stored: &Option<String>| -> Result<Option<String>, CoreError> {
            stored
                .as_deref()
                .map(|s| self.cipher.open(&conversation, Some(old_version), kind, s))
                .transpose()
        };
        let name = open(FieldKind::ConversationName, &conversation.name_ciphertext)?;
        let settings = open(FieldKind::Settings, &conversation.settings_ciphertext)?;
        // A stale preview is dropped rather than blocking the rotation
        let preview = open(FieldKind::LastMessagePreview, &conversation.last_message_preview_ciphertext)
            .unwrap_or_else(|e| {
                warn!("Dropping unreadable preview of conversation {}: {}", conversation_id, e);
                None
            });

        let minted = self.keys.rotate_key(&conversation).await?;
        let seal = |kind, plaintext: Option<String>| -> Result<Option<String>, CoreError> {
            plaintext
                .map(|p| encrypt_field(&minted.key, kind, &p))
                .transpose()
        };
        let name_ciphertext = seal(FieldKind::ConversationName, name)?;
        let settings_ciphertext = seal(FieldKind::Settings, settings)?;
        let preview_ciphertext = seal(FieldKind::LastMessagePreview, preview)?;

        let previous = std::mem::replace(&mut conversation.wrapped_keys, minted.wrapped.clone());
        conversation.key_history.insert(old_version, previous);
        conversation.key_version = minted.version;
        conversation.name_ciphertext = name_ciphertext;
        conversation.settings_ciphertext = settings_ciphertext;
        conversation.last_message_preview_ciphertext = preview_ciphertext;
        conversation.updated_at = crate::now();

        self.repo
            .update_conversation(
                &conversation,
                me,
                &[
                    "keyVersion",
                    "wrappedKeys",
                    "keyHistory",
                    "nameCiphertext",
                    "settingsCiphertext",
                    "lastMessagePreviewCiphertext",
                    "updatedAt",
                ],
            )
            .await?;

        info!(
            "Rotated key of conversation {} to v{} ({} wrapped, {} unwrapped)",
            conversation_id,
            minted.version,
            minted.report.wrapped.len(),
            minted.report.unreadable.len()
        );
        Ok(minted.report)
    }

    /// Wrap the current key for participants that have no entry yet.
    pub async fn rewrap_missing(&self, conversation_id: Uuid) -> Result<WrapReport, CoreError> {
        let me = self.user_id();
        let mut conversation = self.load_conversation(conversation_id).await?;
        if !conversation.is_encrypted {
            return Err(CoreError::InvalidInput(format!("conversation {} is not encrypted", conversation_id)));
        }

        let (wrapped, report) = self.keys.rewrap_missing(&conversation).await?;
        if wrapped.is_empty() {
            return Ok(report);
        }

        conversation.wrapped_keys.extend(wrapped);
        conversation.updated_at = crate::now();
        self.repo
            .update_conversation(&conversation, me, &["wrappedKeys", "updatedAt"])
            .await?;

        info!(
            "Re-wrapped key v{} of conversation {} for {} participants",
            conversation.key_version,
            conversation_id,
            report.wrapped.len()
        );
        Ok(report)
    }

    // -- Retention --

    pub async fn clear_chat_for_me(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DateTime<Utc>, CoreError> {
        self.ensure_self(user_id)?;
        self.retention.clear_chat_for_me(conversation_id, user_id).await
    }

    pub async fn wipe_my_footprint(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DeletionReport, CoreError> {
        self.ensure_self(user_id)?;
        self.retention.wipe_my_footprint(conversation_id, user_id).await
    }

    pub async fn nuclear_wipe(&self, conversation_id: Uuid) -> Result<DeletionReport, CoreError> {
        self.retention.nuclear_wipe(conversation_id, self.user_id()).await
    }
}

fn preview_text(kind: MessageKind, content: &str) -> String {
    match kind {
        MessageKind::Text | MessageKind::System => content.chars().take(PREVIEW_CHARS).collect(),
        MessageKind::Image => "[Image]".into(),
        MessageKind::Video => "[Video]".into(),
        MessageKind::Audio => "[Voice message]".into(),
        MessageKind::File => "[File]".into(),
        MessageKind::CallSignal => "[Call]".into(),
    }
}
