//! The unlock gate for a user's private key and personal master key.
//!
//! A `Vault` starts locked. `unlock` re-derives the key-encryption key from
//! the passphrase and opens both sealed secrets; `lock`, an idle timeout, a
//! failed unlock and dropping the last handle all destroy them. Each
//! unlocked-to-locked transition bumps the epoch.
//!
//! Conversation keys unwrapped during a session are cached inside that
//! session, so every path that destroys the vault secrets destroys them too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use connect_crypto::encrypt::{open, seal};
use connect_crypto::kdf::{KdfParams, derive_key};
use connect_crypto::keys::KEY_SIZE;
use connect_crypto::wrap::IdentityKeyPair;
use connect_crypto::{PublicKey, SymmetricKey};
use connect_types::models::Identity;

use crate::error::CoreError;
use crate::identity::{MASTER_KEY_AAD, PRIVATE_KEY_AAD};

const PERSONAL_AAD: &[u8] = b"connect/personal/v1";

/// Unlocked key material. Every key zeroizes on drop.
struct Unlocked {
    keypair: IdentityKeyPair,
    master_key: SymmetricKey,
    conversation_keys: HashMap<(Uuid, u32), SymmetricKey>,
    last_used: Instant,
}

struct VaultState {
    unlocked: Option<Unlocked>,
    epoch: u64,
}

impl VaultState {
    fn expired(&self, auto_lock_after: Option<Duration>) -> bool {
        match (&self.unlocked, auto_lock_after) {
            (Some(u), Some(limit)) => u.last_used.elapsed() >= limit,
            _ => false,
        }
    }

    fn drop_keys(&mut self) -> bool {
        if self.unlocked.take().is_some() {
            self.epoch += 1;
            true
        } else {
            false
        }
    }
}

struct VaultInner {
    identity: Identity,
    auto_lock_after: Option<Duration>,
    state: Mutex<VaultState>,
}

/// One user's vault. Clones share the same state.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl Vault {
    pub fn new(identity: Identity, auto_lock_after: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                identity,
                auto_lock_after,
                state: Mutex::new(VaultState { unlocked: None, epoch: 0 }),
            }),
        }
    }

    pub fn owner(&self) -> Uuid {
        self.inner.identity.user_id
    }

    pub fn public_key(&self) -> Result<PublicKey, CoreError> {
        PublicKey::from_base64(&self.inner.identity.public_key)
            .map_err(|e| CoreError::SchemaViolation(format!("malformed public key: {}", e)))
    }

    fn state(&self) -> MutexGuard<'_, VaultState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the sealed secrets with `passphrase`. Any failure, whatever its
    /// cause, is `WrongPassphrase` and leaves the vault locked.
    pub async fn unlock(&self, passphrase: &str) -> Result<(), CoreError> {
        let identity = self.inner.identity.clone();
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let opened = crate::run_blocking(move || Ok(open_identity(&identity, &passphrase))).await?;

        let Some((keypair, master_key)) = opened else {
            self.lock();
            warn!("Vault unlock failed for user {}", self.owner());
            return Err(CoreError::WrongPassphrase);
        };

        self.state().unlocked = Some(Unlocked {
            keypair,
            master_key,
            conversation_keys: HashMap::new(),
            last_used: Instant::now(),
        });
        info!("Vault unlocked for user {}", self.owner());
        Ok(())
    }

    /// Destroy the unlocked key material. Idempotent.
    pub fn lock(&self) {
        if self.state().drop_keys() {
            info!("Vault locked for user {}", self.owner());
        }
    }

    /// Whether key material is available right now. An idle-expired vault
    /// reports locked; its keys are destroyed on the next access.
    pub fn is_unlocked(&self) -> bool {
        let state = self.state();
        state.unlocked.is_some() && !state.expired(self.inner.auto_lock_after)
    }

    pub fn epoch(&self) -> u64 {
        self.state().epoch
    }

    fn live<'a>(&self, state: &'a mut VaultState) -> Result<&'a mut Unlocked, CoreError> {
        if state.expired(self.inner.auto_lock_after) && state.drop_keys() {
            info!("Vault auto-locked for user {} after inactivity", self.owner());
        }
        let unlocked = state.unlocked.as_mut().ok_or(CoreError::VaultLocked)?;
        unlocked.last_used = Instant::now();
        Ok(unlocked)
    }

    /// Epoch of the current unlocked session.
    pub(crate) fn session_epoch(&self) -> Result<u64, CoreError> {
        let mut state = self.state();
        self.live(&mut state)?;
        Ok(state.epoch)
    }

    pub(crate) fn with_keypair<T>(&self, f: impl FnOnce(&IdentityKeyPair) -> T) -> Result<T, CoreError> {
        let mut state = self.state();
        let unlocked = self.live(&mut state)?;
        Ok(f(&unlocked.keypair))
    }

    /// A conversation key already unwrapped in this session.
    pub(crate) fn cached_key(&self, conversation_id: Uuid, version: u32) -> Result<Option<SymmetricKey>, CoreError> {
        let mut state = self.state();
        let unlocked = self.live(&mut state)?;
        Ok(unlocked.conversation_keys.get(&(conversation_id, version)).cloned())
    }

    /// Cache a conversation key for the session identified by `epoch`. A key
    /// unwrapped under a session that has since ended is discarded.
    pub(crate) fn cache_key(&self, epoch: u64, conversation_id: Uuid, version: u32, key: SymmetricKey) {
        let mut state = self.state();
        if state.epoch != epoch {
            return;
        }
        if let Ok(unlocked) = self.live(&mut state) {
            unlocked.conversation_keys.insert((conversation_id, version), key);
        }
    }

    /// Conversation keys held right now. An idle-expired vault is locked
    /// first, so this never counts keys past their session.
    #[cfg(test)]
    pub(crate) fn cached_key_count(&self) -> usize {
        let mut state = self.state();
        self.live(&mut state)
            .map(|unlocked| unlocked.conversation_keys.len())
            .unwrap_or(0)
    }

    /// Seal data only this user should ever read (drafts, local notes).
    pub fn seal_personal(&self, plaintext: &str) -> Result<String, CoreError> {
        let mut state = self.state();
        let unlocked = self.live(&mut state)?;
        let sealed = seal(&unlocked.master_key, plaintext.as_bytes(), PERSONAL_AAD)?;
        Ok(BASE64.encode(sealed))
    }

    pub fn open_personal(&self, sealed: &str) -> Result<String, CoreError> {
        let bytes = BASE64.decode(sealed).map_err(|_| CoreError::AuthenticationFailed)?;
        let mut state = self.state();
        let unlocked = self.live(&mut state)?;
        let plaintext = open(&unlocked.master_key, &bytes, PERSONAL_AAD)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CoreError::AuthenticationFailed)
    }
}

fn open_identity(identity: &Identity, passphrase: &str) -> Option<(IdentityKeyPair, SymmetricKey)> {
    let params = KdfParams {
        memory_kib: identity.kdf_memory_kib,
        iterations: identity.kdf_iterations,
        parallelism: identity.kdf_parallelism,
    };
    let salt = BASE64.decode(&identity.kdf_salt).ok()?;
    let kek = derive_key(passphrase.as_bytes(), &salt, params).ok()?;

    let private = open(&kek, &BASE64.decode(&identity.sealed_private_key).ok()?, PRIVATE_KEY_AAD).ok()?;
    let master = open(&kek, &BASE64.decode(&identity.sealed_master_key).ok()?, MASTER_KEY_AAD).ok()?;
    if private.len() != KEY_SIZE {
        return None;
    }

    let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
    secret.copy_from_slice(&private);
    let keypair = IdentityKeyPair::from_secret_bytes(*secret);
    if keypair.public().to_base64() != identity.public_key {
        return None;
    }

    let master_key = SymmetricKey::from_slice(&master).ok()?;
    Some((keypair, master_key))
}
