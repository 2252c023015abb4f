use std::collections::{BTreeMap, BTreeSet};

use chrono::serde::{ts_microseconds, ts_microseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current content-encryption scheme. Stored on every encrypted conversation.
pub const ENCRYPTION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
    CallSignal,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::CallSignal => "call_signal",
            Self::System => "system",
        }
    }
}

/// A user's published identity.
///
/// The public key is world-readable. The private key and the personal master
/// key are only stored sealed under a key derived from the user's passphrase;
/// the salt and KDF cost travel with the record so unlock re-derives the same
/// key-encryption key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    /// Base64 X25519 public key.
    pub public_key: String,
    /// Base64 `nonce || ciphertext || tag` of the X25519 private key.
    pub sealed_private_key: String,
    /// Base64 `nonce || ciphertext || tag` of the personal master key.
    pub sealed_master_key: String,
    /// Base64 Argon2id salt.
    pub kdf_salt: String,
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
    pub kdf_parallelism: u32,
    #[serde(with = "ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// One participant's copy of a conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    /// Base64 ephemeral X25519 public key used for this wrap.
    pub ephemeral_public: String,
    /// Base64 `nonce || ciphertext || tag` of the conversation key.
    pub sealed_key: String,
}

/// Conversation row.
///
/// When `is_encrypted` is set, `name_ciphertext`, `last_message_preview_ciphertext`
/// and `settings_ciphertext` hold base64 ciphertext under the conversation key of
/// `key_version`. Legacy unencrypted rows keep plaintext in the same fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: BTreeSet<Uuid>,
    #[serde(default)]
    pub admins: BTreeSet<Uuid>,
    pub creator_id: Uuid,
    pub is_encrypted: bool,
    pub encryption_version: u32,
    pub key_version: u32,
    #[serde(default)]
    pub wrapped_keys: BTreeMap<Uuid, WrappedKey>,
    /// Wrapped copies of superseded keys, by key version.
    #[serde(default)]
    pub key_history: BTreeMap<u32, BTreeMap<Uuid, WrappedKey>>,
    pub name_ciphertext: Option<String>,
    pub last_message_preview_ciphertext: Option<String>,
    pub last_message_id: Option<Uuid>,
    #[serde(default, with = "ts_microseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub settings_ciphertext: Option<String>,
    /// Set when a message was stored without encryption in an encrypted conversation.
    #[serde(default)]
    pub contains_plaintext: bool,
    #[serde(with = "ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A conversation whose only participant is its creator.
    pub fn is_self_chat(&self) -> bool {
        self.participants.len() == 1
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// Wrapped copy of the key for `version`, for `user_id`.
    pub fn wrapped_key_for(&self, user_id: Uuid, version: u32) -> Option<&WrappedKey> {
        if version == self.key_version {
            self.wrapped_keys.get(&user_id)
        } else {
            self.key_history.get(&version).and_then(|m| m.get(&user_id))
        }
    }

    /// Participants with no wrapped entry for the current key.
    pub fn unwrapped_participants(&self) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| !self.wrapped_keys.contains_key(p))
            .copied()
            .collect()
    }
}

/// Message row. `content` and every `attachments` entry are base64
/// ciphertext when `key_version` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub key_version: Option<u32>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub read_by: BTreeSet<Uuid>,
    #[serde(with = "ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_encrypted(&self) -> bool {
        self.key_version.is_some()
    }
}

/// Decrypted form of `Conversation::settings_ciphertext`.
///
/// `cleared_at` is the per-user clear-for-me watermark. Unknown settings keys
/// are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    #[serde(default)]
    pub cleared_at: BTreeMap<Uuid, DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConversationSettings {
    pub fn watermark(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.cleared_at.get(&user_id).copied()
    }

    /// Move the user's watermark to `at`. Never moves it backwards.
    pub fn advance_watermark(&mut self, user_id: Uuid, at: DateTime<Utc>) -> DateTime<Utc> {
        let mark = self.cleared_at.entry(user_id).or_insert(at);
        if at > *mark {
            *mark = at;
        }
        *mark
    }

    pub fn hides(&self, user_id: Uuid, created_at: DateTime<Utc>) -> bool {
        self.watermark(user_id).is_some_and(|mark| created_at < mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn watermark_only_moves_forward() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut settings = ConversationSettings::default();

        assert_eq!(settings.advance_watermark(user, now), now);
        assert_eq!(settings.advance_watermark(user, now - Duration::seconds(5)), now);
        let later = now + Duration::seconds(5);
        assert_eq!(settings.advance_watermark(user, later), later);
    }

    #[test]
    fn watermark_is_per_user() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();
        let mut settings = ConversationSettings::default();
        settings.advance_watermark(alice, now);

        let earlier = now - Duration::seconds(1);
        assert!(settings.hides(alice, earlier));
        assert!(!settings.hides(alice, now));
        assert!(!settings.hides(bob, earlier));
    }

    #[test]
    fn settings_keep_unknown_keys() {
        let json = r#"{"clearedAt":{},"muted":true}"#;
        let settings: ConversationSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.extra.get("muted"), Some(&Value::Bool(true)));

        let out = serde_json::to_value(&settings).unwrap();
        assert_eq!(out["muted"], Value::Bool(true));
    }
}
