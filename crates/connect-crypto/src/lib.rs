/// Connect Crypto Library
///
/// Primitives only, no I/O:
/// - `keys`: random 256-bit symmetric keys and the X25519 public-key newtype
/// - `encrypt`: AES-256-GCM sealing, `nonce || ciphertext || tag`
/// - `wrap`: X25519 + HKDF-SHA256 per-recipient key wrapping
/// - `kdf`: Argon2id passphrase key derivation
pub mod encrypt;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod wrap;

pub use error::CryptoError;
pub use keys::{PublicKey, SymmetricKey};
