//! End-to-end encryption core for the chat client.
//!
//! - `identity`: published X25519 identities, sealed under the passphrase
//! - `vault`: the unlock gate for a user's private key and master key
//! - `keys`: per-conversation keys, wrapped for every participant
//! - `cipher`: field encryption for message bodies and conversation metadata
//! - `retention`: footprint wipe, clear-for-me and nuclear wipe
//! - `chat`: the `ChatService` facade the UI layer calls

pub mod chat;
pub mod cipher;
pub mod config;
pub mod error;
pub mod identity;
pub mod keys;
pub mod repo;
pub mod retention;
pub mod vault;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::error;

use connect_crypto::CryptoError;

pub use chat::ChatService;
pub use config::CoreConfig;
pub use error::{CoreError, Recovery};
pub use identity::IdentityKeyStore;
pub use vault::Vault;

/// Current time at the microsecond precision rows are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Run CPU-heavy key derivation off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        CoreError::Crypto(CryptoError::KeyDerivation(format!("blocking task failed: {}", e)))
    })?
}

#[cfg(test)]
pub(crate) fn test_config() -> CoreConfig {
    CoreConfig {
        kdf: connect_crypto::kdf::KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..CoreConfig::default()
    }
}
