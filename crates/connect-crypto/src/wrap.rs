//! Per-recipient key wrapping.
//!
//! A fresh ephemeral X25519 keypair is generated for every wrap. The shared
//! secret with the recipient's identity key goes through HKDF-SHA256
//! (salt = ephemeral_public || recipient_public, info = caller context) to a
//! one-time wrapping key, which AES-256-GCM seals the payload key under.
//! The same context is used as associated data, so a wrapped copy cannot be
//! replayed for another conversation, recipient or key version.

use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as DhPublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encrypt::{open, seal};
use crate::error::CryptoError;
use crate::keys::{KEY_SIZE, PublicKey, SymmetricKey};

/// Long-term X25519 identity keypair. The secret half zeroizes on drop.
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from_bytes(DhPublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

/// A payload key sealed for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ephemeral_public: PublicKey,
    pub sealed_key: Vec<u8>,
}

/// Wrap `key` so only the holder of `recipient`'s secret can recover it.
pub fn wrap_key(key: &SymmetricKey, recipient: &PublicKey, context: &[u8]) -> Result<WrappedKey, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from_bytes(DhPublicKey::from(&ephemeral).to_bytes());

    let shared = ephemeral.diffie_hellman(&DhPublicKey::from(*recipient.as_bytes()));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("recipient public key is low-order".into()));
    }

    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &ephemeral_public, recipient, context)?;
    let sealed_key = seal(&wrapping_key, key.as_bytes(), context)?;

    Ok(WrappedKey { ephemeral_public, sealed_key })
}

/// Recover a key wrapped for `recipient`. A wrong recipient or context fails
/// authentication.
pub fn unwrap_key(
    wrapped: &WrappedKey,
    recipient: &IdentityKeyPair,
    context: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let shared = recipient
        .secret
        .diffie_hellman(&DhPublicKey::from(*wrapped.ephemeral_public.as_bytes()));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("ephemeral public key is low-order".into()));
    }

    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &wrapped.ephemeral_public, &recipient.public, context)?;
    let plaintext = open(&wrapping_key, &wrapped.sealed_key, context)?;
    SymmetricKey::from_slice(&plaintext)
}

fn derive_wrapping_key(
    shared: &[u8; KEY_SIZE],
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
    context: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let mut salt = [0u8; 2 * KEY_SIZE];
    salt[..KEY_SIZE].copy_from_slice(ephemeral_public.as_bytes());
    salt[KEY_SIZE..].copy_from_slice(recipient_public.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(context, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(*okm))
}
