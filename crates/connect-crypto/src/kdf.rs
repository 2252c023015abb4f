//! Passphrase key derivation (Argon2id).

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{KEY_SIZE, SymmetricKey};

pub const SALT_SIZE: usize = 16;

/// Argon2id cost parameters. Stored next to every sealed secret so the same
/// key can be re-derived after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Interactive desktop cost: 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Fresh random salt. Not secret; store it with the sealed material.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    rand::random()
}

/// Derive the 32-byte key-encryption key from a passphrase and salt.
pub fn derive_key(passphrase: &[u8], salt: &[u8], params: KdfParams) -> Result<SymmetricKey, CryptoError> {
    let params = Params::new(params.memory_kib, params.iterations, params.parallelism, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase, salt, &mut output[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(*output))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: KdfParams = KdfParams { memory_kib: 64, iterations: 1, parallelism: 1 };

    #[test]
    fn same_inputs_same_key() {
        let salt = generate_salt();
        let a = derive_key(b"correct horse", &salt, CHEAP).unwrap();
        let b = derive_key(b"correct horse", &salt, CHEAP).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_and_passphrase_change_key() {
        let salt = generate_salt();
        let base = derive_key(b"correct horse", &salt, CHEAP).unwrap();
        let other_pass = derive_key(b"correct horsf", &salt, CHEAP).unwrap();
        let other_salt = derive_key(b"correct horse", &generate_salt(), CHEAP).unwrap();
        assert_ne!(base.as_bytes(), other_pass.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
    }

    #[test]
    fn invalid_params_are_an_error() {
        let params = KdfParams { memory_kib: 1, iterations: 0, parallelism: 1 };
        assert!(matches!(
            derive_key(b"pw", &generate_salt(), params),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
