use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("authentication failed: ciphertext corrupted or sealed under a different key")]
    AuthenticationFailed,

    #[error("sealed payload too short: {0} bytes")]
    Truncated(usize),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
