use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, ConversationKind, MessageKind};

/// Neutral text shown in place of anything that could not be decrypted.
pub const PLACEHOLDER: &str = "Encrypted message";

// -- Content --

/// Why a sealed field could not be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unreadable {
    /// The vault is locked; unlocking will make the field readable.
    VaultLocked,
    /// The caller holds no wrapped copy of the key this field was sealed under.
    KeyNotWrappedForCaller,
    /// The ciphertext failed authentication (corrupted or foreign).
    AuthenticationFailed,
}

/// A field as the UI sees it: plaintext, or a reason it is hidden.
/// Never carries ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Content {
    Plain(String),
    Unreadable(Unreadable),
}

impl Content {
    pub fn display(&self) -> &str {
        match self {
            Self::Plain(text) => text,
            Self::Unreadable(_) => PLACEHOLDER,
        }
    }

    pub fn as_plain(&self) -> Option<&str> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Unreadable(_) => None,
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Plain(_))
    }
}

// -- Messages --

/// A message as the sender hands it over. Attachment references are sealed
/// under the conversation key like the body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

impl SendMessageRequest {
    pub fn new(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            content: content.into(),
            kind,
            attachments: Vec::new(),
            reply_to: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn replying_to(mut self, message_id: Uuid) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub content: Content,
    pub attachments: Vec<Content>,
    pub reply_to: Option<Uuid>,
    pub read_by: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participants: BTreeSet<Uuid>,
    pub name: Option<Content>,
    pub last_message_preview: Option<Content>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub is_encrypted: bool,
    pub key_version: u32,
    /// Participants with no wrapped copy of the current key.
    pub unreadable_participants: Vec<Uuid>,
}

/// Result of creating a conversation.
#[derive(Debug, Clone)]
pub struct CreatedConversation {
    pub conversation: Conversation,
    /// Participants the key could not be wrapped for, with the reason.
    pub unreadable: BTreeMap<Uuid, String>,
}

/// Per-participant outcome of a wrap pass (create, rotate, re-wrap).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WrapReport {
    pub wrapped: BTreeSet<Uuid>,
    pub unreadable: BTreeMap<Uuid, String>,
}

impl WrapReport {
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }
}

// -- Retention --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub message_id: Uuid,
    pub reason: String,
}

/// Outcome of a batched hard delete. Partial completion is reported, not hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub requested: usize,
    pub deleted: usize,
    pub failed: Vec<FailedDeletion>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.deleted == self.requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_content_displays_placeholder() {
        for reason in [
            Unreadable::VaultLocked,
            Unreadable::KeyNotWrappedForCaller,
            Unreadable::AuthenticationFailed,
        ] {
            let content = Content::Unreadable(reason);
            assert_eq!(content.display(), PLACEHOLDER);
            assert!(content.as_plain().is_none());
        }
        assert_eq!(Content::Plain("hi".into()).display(), "hi");
    }

    #[test]
    fn deletion_report_completeness() {
        let mut report = DeletionReport { requested: 2, deleted: 2, failed: vec![] };
        assert!(report.is_complete());

        report.deleted = 1;
        report.failed.push(FailedDeletion { message_id: Uuid::new_v4(), reason: "timeout".into() });
        assert!(!report.is_complete());
    }
}
