use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;

/// A 256-bit AES-GCM key. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", bytes.len())))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// X25519 public key, base64 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(encoded)?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| {
                CryptoError::InvalidKey(format!("public key must be {KEY_SIZE} bytes, got {}", v.len()))
            })?;
        Ok(Self(key))
    }

    /// SHA-256 of the key, first 16 bytes, hex in groups of 4.
    /// Safe to log and to compare out of band.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..16])
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(SymmetricKey::generate().as_bytes(), SymmetricKey::generate().as_bytes());
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = SymmetricKey::from_bytes([0xAB; KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("171"));
        assert!(!printed.to_lowercase().contains("ab"));
    }

    #[test]
    fn public_key_base64_rejects_wrong_length() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(PublicKey::from_base64(&short), Err(CryptoError::InvalidKey(_))));

        let key = PublicKey::from_bytes([7u8; KEY_SIZE]);
        assert_eq!(PublicKey::from_base64(&key.to_base64()).unwrap(), key);
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let fp = PublicKey::from_bytes([9u8; KEY_SIZE]).fingerprint();
        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().all(|g| g.len() == 4));
    }
}
