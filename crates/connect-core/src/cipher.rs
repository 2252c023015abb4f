//! Field encryption for message bodies and conversation metadata.
//!
//! Every sealed field is `base64(nonce || ciphertext || tag)` under the
//! conversation key, with the field kind as associated data so a sealed
//! value only opens in the kind of field it was written to.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{debug, warn};

use connect_crypto::SymmetricKey;
use connect_crypto::encrypt::{MIN_SEALED_LEN, open, seal};
use connect_types::api::{Content, Unreadable};
use connect_types::models::Conversation;

use crate::error::CoreError;
use crate::keys::ConversationKeyManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    MessageBody,
    ConversationName,
    LastMessagePreview,
    Settings,
    Attachment,
}

impl FieldKind {
    fn aad(&self) -> &'static [u8] {
        match self {
            Self::MessageBody => b"connect/field/message-body/v1",
            Self::ConversationName => b"connect/field/conversation-name/v1",
            Self::LastMessagePreview => b"connect/field/last-message-preview/v1",
            Self::Settings => b"connect/field/settings/v1",
            Self::Attachment => b"connect/field/attachment/v1",
        }
    }
}

/// Encoded length of the smallest sealed field (empty plaintext).
pub const MIN_SEALED_FIELD_LEN: usize = MIN_SEALED_LEN.div_ceil(3) * 4;

/// Rows written before encryption keep plaintext in the same fields. A value
/// shorter than any sealed field is treated as such legacy plaintext and
/// shown as-is.
///
/// This is a backward-compatibility rule, not a security boundary: it only
/// decides how a stored value is displayed. Anyone with write access to a
/// row can plant a short plaintext value and it will be displayed.
/// Legacy values are only passed through while the vault is unlocked.
pub fn is_legacy_plaintext(stored: &str) -> bool {
    stored.len() < MIN_SEALED_FIELD_LEN
}

pub fn encrypt_field(key: &SymmetricKey, kind: FieldKind, plaintext: &str) -> Result<String, CoreError> {
    let sealed = seal(key, plaintext.as_bytes(), kind.aad())?;
    Ok(BASE64.encode(sealed))
}

/// Open a sealed field. A wrong key and a corrupted value both fail with
/// `AuthenticationFailed`; AEAD cannot tell them apart.
pub fn decrypt_field(key: &SymmetricKey, kind: FieldKind, ciphertext: &str) -> Result<String, CoreError> {
    let sealed = BASE64.decode(ciphertext).map_err(|_| CoreError::AuthenticationFailed)?;
    let plaintext = open(key, &sealed, kind.aad())?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| CoreError::AuthenticationFailed)
}

/// Seals and opens fields with the caller's copy of the conversation key.
#[derive(Clone)]
pub struct ContentCipher {
    keys: ConversationKeyManager,
}

impl ContentCipher {
    pub fn new(keys: ConversationKeyManager) -> Self {
        Self { keys }
    }

    /// Key version a conversation's metadata fields are sealed under.
    pub fn metadata_version(conversation: &Conversation) -> Option<u32> {
        conversation.is_encrypted.then_some(conversation.key_version)
    }

    /// Seal `plaintext` under the conversation's current key. Unencrypted
    /// conversations store it as-is. Returns the stored value and the key
    /// version it was sealed under.
    pub fn seal(
        &self,
        conversation: &Conversation,
        kind: FieldKind,
        plaintext: &str,
    ) -> Result<(String, Option<u32>), CoreError> {
        if !conversation.is_encrypted {
            return Ok((plaintext.to_owned(), None));
        }
        let key = self.keys.unwrap_for_self(conversation, conversation.key_version)?;
        Ok((encrypt_field(&key, kind, plaintext)?, Some(conversation.key_version)))
    }

    /// Open a stored field sealed under `version`; `None` means it was stored
    /// as plaintext.
    pub fn open(
        &self,
        conversation: &Conversation,
        version: Option<u32>,
        kind: FieldKind,
        stored: &str,
    ) -> Result<String, CoreError> {
        let Some(version) = version else {
            return Ok(stored.to_owned());
        };
        // A locked vault reveals nothing from an encrypted row, legacy or not
        self.keys.ensure_unlocked()?;
        if is_legacy_plaintext(stored) {
            return Ok(stored.to_owned());
        }
        let key = self.keys.unwrap_for_self(conversation, version)?;
        decrypt_field(&key, kind, stored)
    }

    /// Like `open`, but never fails: anything that cannot be opened becomes
    /// an `Unreadable` reason. Ciphertext is never returned.
    pub fn reveal(&self, conversation: &Conversation, version: Option<u32>, kind: FieldKind, stored: &str) -> Content {
        match self.open(conversation, version, kind, stored) {
            Ok(plaintext) => Content::Plain(plaintext),
            Err(e) => {
                let reason = e.unreadable().unwrap_or(Unreadable::AuthenticationFailed);
                if reason == Unreadable::AuthenticationFailed {
                    warn!("Undecryptable {:?} in conversation {}: {}", kind, conversation.id, e);
                } else {
                    debug!("{:?} in conversation {} unreadable: {}", kind, conversation.id, e);
                }
                Content::Unreadable(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_roundtrip() {
        let key = SymmetricKey::generate();
        let sealed = encrypt_field(&key, FieldKind::MessageBody, "hello").unwrap();
        assert_ne!(sealed, "hello");
        assert_eq!(decrypt_field(&key, FieldKind::MessageBody, &sealed).unwrap(), "hello");
    }

    #[test]
    fn sealed_value_is_bound_to_its_field_kind() {
        let key = SymmetricKey::generate();
        let name = encrypt_field(&key, FieldKind::ConversationName, "Book club").unwrap();
        assert!(matches!(
            decrypt_field(&key, FieldKind::MessageBody, &name),
            Err(CoreError::AuthenticationFailed)
        ));
    }

    #[test]
    fn any_flipped_bit_fails_authentication() {
        let key = SymmetricKey::generate();
        let sealed = BASE64.decode(encrypt_field(&key, FieldKind::MessageBody, "hi").unwrap()).unwrap();

        for i in 0..sealed.len() * 8 {
            let mut tampered = sealed.clone();
            tampered[i / 8] ^= 1 << (i % 8);
            assert!(matches!(
                decrypt_field(&key, FieldKind::MessageBody, &BASE64.encode(&tampered)),
                Err(CoreError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = encrypt_field(&SymmetricKey::generate(), FieldKind::Settings, "{}").unwrap();
        assert!(matches!(
            decrypt_field(&SymmetricKey::generate(), FieldKind::Settings, &sealed),
            Err(CoreError::AuthenticationFailed)
        ));
    }

    #[test]
    fn legacy_threshold_matches_the_smallest_sealed_field() {
        let empty = encrypt_field(&SymmetricKey::generate(), FieldKind::MessageBody, "").unwrap();
        assert_eq!(empty.len(), MIN_SEALED_FIELD_LEN);
        assert!(!is_legacy_plaintext(&empty));
        assert!(is_legacy_plaintext("hello from 2019"));
    }
}
