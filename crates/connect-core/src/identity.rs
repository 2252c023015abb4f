//! Published identities: one X25519 keypair and one personal master key per
//! user. The public half is world-readable; the secrets are only ever stored
//! sealed under an Argon2id key derived from the user's passphrase.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use connect_crypto::encrypt::seal;
use connect_crypto::kdf::{KdfParams, derive_key, generate_salt};
use connect_crypto::wrap::IdentityKeyPair;
use connect_crypto::{PublicKey, SymmetricKey};
use connect_db::MessageStore;
use connect_types::models::Identity;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::repo::Repo;
use crate::vault::Vault;

pub(crate) const PRIVATE_KEY_AAD: &[u8] = b"connect/identity/private-key/v1";
pub(crate) const MASTER_KEY_AAD: &[u8] = b"connect/identity/master-key/v1";

const MIN_PASSPHRASE_LEN: usize = 8;

#[derive(Clone)]
pub struct IdentityKeyStore {
    repo: Repo,
    kdf: KdfParams,
    auto_lock_after: Option<Duration>,
}

impl IdentityKeyStore {
    pub fn new(store: Arc<dyn MessageStore>, config: &CoreConfig) -> Self {
        Self::with_repo(Repo::new(store, config.store_timeout), config)
    }

    pub(crate) fn with_repo(repo: Repo, config: &CoreConfig) -> Self {
        Self {
            repo,
            kdf: config.kdf,
            auto_lock_after: config.auto_lock_after,
        }
    }

    /// Generate and publish `user_id`'s keypair and master key, sealed under
    /// `passphrase`. Fails if the user already has an identity.
    pub async fn publish_identity(&self, user_id: Uuid, passphrase: &str) -> Result<PublicKey, CoreError> {
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(CoreError::InvalidInput(format!(
                "passphrase must be at least {} characters",
                MIN_PASSPHRASE_LEN
            )));
        }

        match self.repo.get_identity(user_id).await {
            Ok(_) => return Err(CoreError::IdentityAlreadyExists(user_id)),
            Err(CoreError::IdentityNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let passphrase = Zeroizing::new(passphrase.to_owned());
        let kdf = self.kdf;
        let (identity, public) = crate::run_blocking(move || seal_identity(user_id, &passphrase, kdf)).await?;

        // A concurrent publish loses here with IdentityAlreadyExists
        self.repo.insert_identity(&identity).await?;

        info!("Published identity for user {} ({})", user_id, public.fingerprint());
        Ok(public)
    }

    pub async fn resolve_public_key(&self, user_id: Uuid) -> Result<PublicKey, CoreError> {
        let identity = self.repo.get_identity(user_id).await?;
        PublicKey::from_base64(&identity.public_key).map_err(|e| {
            CoreError::SchemaViolation(format!("identity {} has a malformed public key: {}", user_id, e))
        })
    }

    /// A locked vault over `user_id`'s sealed identity.
    pub async fn open_vault(&self, user_id: Uuid) -> Result<Vault, CoreError> {
        let identity = self.repo.get_identity(user_id).await?;
        Ok(Vault::new(identity, self.auto_lock_after))
    }
}

pub(crate) fn seal_identity(
    user_id: Uuid,
    passphrase: &str,
    kdf: KdfParams,
) -> Result<(Identity, PublicKey), CoreError> {
    let keypair = IdentityKeyPair::generate();
    let master_key = SymmetricKey::generate();
    let salt = generate_salt();

    let kek = derive_key(passphrase.as_bytes(), &salt, kdf)?;
    let sealed_private_key = seal(&kek, &keypair.secret_bytes()[..], PRIVATE_KEY_AAD)?;
    let sealed_master_key = seal(&kek, master_key.as_bytes(), MASTER_KEY_AAD)?;

    let public = keypair.public();
    let identity = Identity {
        user_id,
        public_key: public.to_base64(),
        sealed_private_key: BASE64.encode(sealed_private_key),
        sealed_master_key: BASE64.encode(sealed_master_key),
        kdf_salt: BASE64.encode(salt),
        kdf_memory_kib: kdf.memory_kib,
        kdf_iterations: kdf.iterations,
        kdf_parallelism: kdf.parallelism,
        created_at: crate::now(),
    };
    Ok((identity, public))
}
