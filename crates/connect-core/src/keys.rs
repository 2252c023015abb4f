//! Conversation keys: minting, per-participant wrapping, unwrapping for the
//! vault owner and rotation.
//!
//! Unwrapped keys never leave this process. They are cached in the vault's
//! unlocked session by (conversation, key version) and die with it.

use std::collections::{BTreeMap, BTreeSet};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures_util::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use connect_crypto::wrap::{self, unwrap_key, wrap_key};
use connect_crypto::{PublicKey, SymmetricKey};
use connect_types::api::WrapReport;
use connect_types::models::{Conversation, WrappedKey};

use crate::error::CoreError;
use crate::identity::IdentityKeyStore;
use crate::vault::Vault;

/// Binds a wrapped copy to one conversation, recipient and key version.
pub fn wrap_context(conversation_id: Uuid, user_id: Uuid, version: u32) -> String {
    format!("connect/conversation-key/v1|{}|{}|{}", conversation_id, user_id, version)
}

/// A freshly generated conversation key and its wrapped copies.
pub struct MintedKey {
    pub key: SymmetricKey,
    pub version: u32,
    pub wrapped: BTreeMap<Uuid, WrappedKey>,
    pub report: WrapReport,
}

#[derive(Clone)]
pub struct ConversationKeyManager {
    identities: IdentityKeyStore,
    vault: Vault,
}

impl ConversationKeyManager {
    pub fn new(identities: IdentityKeyStore, vault: Vault) -> Self {
        Self { identities, vault }
    }

    /// Generate a version-1 key for a new conversation and wrap it for every
    /// participant. A participant that cannot be wrapped for is reported, not
    /// fatal.
    pub async fn create_conversation_key(&self, conversation_id: Uuid, participants: &BTreeSet<Uuid>) -> MintedKey {
        self.mint(conversation_id, 1, participants.iter().copied()).await
    }

    /// Generate the next key version for `conversation`, wrapped for its
    /// current participants. The caller must hold the current key.
    pub async fn rotate_key(&self, conversation: &Conversation) -> Result<MintedKey, CoreError> {
        self.unwrap_for_self(conversation, conversation.key_version)?;
        let version = conversation
            .key_version
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidInput("key version overflow".into()))?;

        let minted = self
            .mint(conversation.id, version, conversation.participants.iter().copied())
            .await;
        if minted.wrapped.contains_key(&self.vault.owner()) {
            self.remember(conversation.id, version, &minted.key);
        }
        Ok(minted)
    }

    async fn mint(
        &self,
        conversation_id: Uuid,
        version: u32,
        participants: impl IntoIterator<Item = Uuid>,
    ) -> MintedKey {
        let key = SymmetricKey::generate();
        let (wrapped, report) = self.wrap_for_all(conversation_id, version, &key, participants).await;
        MintedKey { key, version, wrapped, report }
    }

    async fn wrap_for_all(
        &self,
        conversation_id: Uuid,
        version: u32,
        key: &SymmetricKey,
        participants: impl IntoIterator<Item = Uuid>,
    ) -> (BTreeMap<Uuid, WrappedKey>, WrapReport) {
        let results = join_all(
            participants
                .into_iter()
                .map(|user_id| async move { (user_id, self.wrap_for(conversation_id, version, key, user_id).await) }),
        )
        .await;

        let mut wrapped = BTreeMap::new();
        let mut report = WrapReport::default();
        for (user_id, result) in results {
            match result {
                Ok(entry) => {
                    wrapped.insert(user_id, entry);
                    report.wrapped.insert(user_id);
                }
                Err(e) => {
                    warn!(
                        "Could not wrap key v{} of conversation {} for user {}: {}",
                        version, conversation_id, user_id, e
                    );
                    report.unreadable.insert(user_id, e.to_string());
                }
            }
        }
        (wrapped, report)
    }

    /// Wrap `key` for one user under their published public key.
    pub async fn wrap_for(
        &self,
        conversation_id: Uuid,
        version: u32,
        key: &SymmetricKey,
        user_id: Uuid,
    ) -> Result<WrappedKey, CoreError> {
        let public = self.identities.resolve_public_key(user_id).await?;
        let context = wrap_context(conversation_id, user_id, version);
        let wrapped = wrap_key(key, &public, context.as_bytes())?;
        Ok(WrappedKey {
            ephemeral_public: wrapped.ephemeral_public.to_base64(),
            sealed_key: BASE64.encode(&wrapped.sealed_key),
        })
    }

    /// `VaultLocked` unless the owner's session is live.
    pub fn ensure_unlocked(&self) -> Result<(), CoreError> {
        self.vault.session_epoch().map(|_| ())
    }

    /// The vault owner's copy of key `version` of `conversation`.
    pub fn unwrap_for_self(&self, conversation: &Conversation, version: u32) -> Result<SymmetricKey, CoreError> {
        let epoch = self.vault.session_epoch()?;
        if let Some(key) = self.vault.cached_key(conversation.id, version)? {
            return Ok(key);
        }

        let owner = self.vault.owner();
        let entry = conversation
            .wrapped_key_for(owner, version)
            .ok_or(CoreError::KeyNotWrappedForCaller { conversation_id: conversation.id })?;
        let wrapped = decode_wrapped(entry)?;
        let context = wrap_context(conversation.id, owner, version);

        let key = self
            .vault
            .with_keypair(|keypair| unwrap_key(&wrapped, keypair, context.as_bytes()))??;
        self.vault.cache_key(epoch, conversation.id, version, key.clone());

        debug!("Unwrapped key v{} of conversation {}", version, conversation.id);
        Ok(key)
    }

    /// Cache a key this session already holds, if the vault is unlocked.
    pub fn remember(&self, conversation_id: Uuid, version: u32, key: &SymmetricKey) {
        if let Ok(epoch) = self.vault.session_epoch() {
            self.vault.cache_key(epoch, conversation_id, version, key.clone());
        }
    }

    /// Wrap the current key for participants with no entry. Returns only the
    /// new entries.
    pub async fn rewrap_missing(
        &self,
        conversation: &Conversation,
    ) -> Result<(BTreeMap<Uuid, WrappedKey>, WrapReport), CoreError> {
        let key = self.unwrap_for_self(conversation, conversation.key_version)?;
        Ok(self
            .wrap_for_all(conversation.id, conversation.key_version, &key, conversation.unwrapped_participants())
            .await)
    }
}

fn decode_wrapped(entry: &WrappedKey) -> Result<wrap::WrappedKey, CoreError> {
    let ephemeral_public =
        PublicKey::from_base64(&entry.ephemeral_public).map_err(|_| CoreError::AuthenticationFailed)?;
    let sealed_key = BASE64
        .decode(&entry.sealed_key)
        .map_err(|_| CoreError::AuthenticationFailed)?;
    Ok(wrap::WrappedKey { ephemeral_public, sealed_key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestUser, conversation_with, setup};

    fn manager(user: &TestUser) -> ConversationKeyManager {
        ConversationKeyManager::new(user.identities.clone(), user.vault.clone())
    }

    #[tokio::test]
    async fn every_participant_unwraps_the_same_key() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let bob = TestUser::new(&db, &config).await;
        let conversation_id = Uuid::new_v4();

        let minted = manager(&alice)
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id, bob.id]))
            .await;
        assert!(minted.report.is_complete());
        let conversation = conversation_with(conversation_id, alice.id, &minted);

        for user in [&alice, &bob] {
            let key = manager(user).unwrap_for_self(&conversation, 1).unwrap();
            assert_eq!(key.as_bytes(), minted.key.as_bytes());
        }
    }

    #[tokio::test]
    async fn missing_identity_does_not_block_the_others() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let ghost = Uuid::new_v4();

        let minted = manager(&alice)
            .create_conversation_key(Uuid::new_v4(), &BTreeSet::from([alice.id, ghost]))
            .await;
        assert!(minted.wrapped.contains_key(&alice.id));
        assert!(!minted.wrapped.contains_key(&ghost));
        assert!(minted.report.unreadable.contains_key(&ghost));
    }

    #[tokio::test]
    async fn caller_without_an_entry_is_told_so() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let carol = TestUser::new(&db, &config).await;
        let conversation_id = Uuid::new_v4();

        let minted = manager(&alice)
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);

        assert!(matches!(
            manager(&carol).unwrap_for_self(&conversation, 1),
            Err(CoreError::KeyNotWrappedForCaller { conversation_id: id }) if id == conversation_id
        ));
    }

    #[tokio::test]
    async fn lock_invalidates_cached_keys() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);
        let conversation_id = Uuid::new_v4();

        let minted = keys
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);
        keys.unwrap_for_self(&conversation, 1).unwrap();

        alice.vault.lock();
        assert!(matches!(keys.unwrap_for_self(&conversation, 1), Err(CoreError::VaultLocked)));

        alice.vault.unlock(TestUser::PASSPHRASE).await.unwrap();
        assert!(keys.unwrap_for_self(&conversation, 1).is_ok());
    }

    #[tokio::test]
    async fn locking_the_vault_destroys_cached_keys() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);
        let conversation_id = Uuid::new_v4();

        let minted = keys
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);
        keys.unwrap_for_self(&conversation, 1).unwrap();
        assert_eq!(alice.vault.cached_key_count(), 1);

        // Locked through the vault directly, not through the chat service
        alice.vault.lock();
        alice.vault.unlock(TestUser::PASSPHRASE).await.unwrap();
        assert_eq!(alice.vault.cached_key_count(), 0);
    }

    #[tokio::test]
    async fn idle_expiry_destroys_cached_keys() {
        let (db, mut config) = setup();
        config.auto_lock_after = Some(std::time::Duration::from_millis(200));
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);
        let conversation_id = Uuid::new_v4();

        let minted = keys
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);
        keys.unwrap_for_self(&conversation, 1).unwrap();
        assert_eq!(alice.vault.cached_key_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(alice.vault.cached_key_count(), 0);
        assert!(matches!(keys.unwrap_for_self(&conversation, 1), Err(CoreError::VaultLocked)));
    }

    #[tokio::test]
    async fn failed_unlock_destroys_cached_keys() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);
        let conversation_id = Uuid::new_v4();

        let minted = keys
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);
        keys.unwrap_for_self(&conversation, 1).unwrap();

        assert!(alice.vault.unlock("not the passphrase").await.is_err());
        alice.vault.unlock(TestUser::PASSPHRASE).await.unwrap();
        assert_eq!(alice.vault.cached_key_count(), 0);
    }

    #[tokio::test]
    async fn wrapped_copy_is_bound_to_its_conversation() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);

        let minted = keys
            .create_conversation_key(Uuid::new_v4(), &BTreeSet::from([alice.id]))
            .await;
        // Same wrapped entries presented under another conversation id
        let replayed = conversation_with(Uuid::new_v4(), alice.id, &minted);
        assert!(matches!(keys.unwrap_for_self(&replayed, 1), Err(CoreError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn rotation_bumps_the_version() {
        let (db, config) = setup();
        let alice = TestUser::new(&db, &config).await;
        let keys = manager(&alice);
        let conversation_id = Uuid::new_v4();

        let minted = keys
            .create_conversation_key(conversation_id, &BTreeSet::from([alice.id]))
            .await;
        let conversation = conversation_with(conversation_id, alice.id, &minted);

        let rotated = keys.rotate_key(&conversation).await.unwrap();
        assert_eq!(rotated.version, 2);
        assert_ne!(rotated.key.as_bytes(), minted.key.as_bytes());
        assert!(rotated.wrapped.contains_key(&alice.id));
    }
}
