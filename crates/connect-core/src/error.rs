use thiserror::Error;
use uuid::Uuid;

use connect_crypto::CryptoError;
use connect_db::StoreError;
use connect_types::api::Unreadable;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Vault is locked")]
    VaultLocked,

    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Conversation key for {conversation_id} is not wrapped for this user")]
    KeyNotWrappedForCaller { conversation_id: Uuid },

    #[error("Authentication failed: ciphertext is corrupted or sealed under another key")]
    AuthenticationFailed,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Identity already published for user {0}")]
    IdentityAlreadyExists(Uuid),

    #[error("No identity published for user {0}")]
    IdentityNotFound(Uuid),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// What a caller should do about a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Ask the user for their passphrase, then retry.
    PromptUnlock,
    /// Render the neutral placeholder; retrying will not help.
    ShowPlaceholder,
    /// Someone holding the key must re-wrap it for this user.
    Reinvite,
    /// Transient; the caller may retry with backoff.
    RetryWithBackoff,
    Fatal,
}

impl CoreError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::VaultLocked | Self::WrongPassphrase => Recovery::PromptUnlock,
            Self::KeyNotWrappedForCaller { .. } => Recovery::Reinvite,
            Self::AuthenticationFailed => Recovery::ShowPlaceholder,
            Self::StoreUnavailable(_) => Recovery::RetryWithBackoff,
            _ => Recovery::Fatal,
        }
    }

    /// The placeholder reason for errors that only make one field unreadable.
    pub fn unreadable(&self) -> Option<Unreadable> {
        match self {
            Self::VaultLocked => Some(Unreadable::VaultLocked),
            Self::KeyNotWrappedForCaller { .. } => Some(Unreadable::KeyNotWrappedForCaller),
            Self::AuthenticationFailed => Some(Unreadable::AuthenticationFailed),
            _ => None,
        }
    }
}

impl From<CryptoError> for CoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            // A short or undecodable payload is indistinguishable from tampering
            CryptoError::AuthenticationFailed | CryptoError::Truncated(_) | CryptoError::Base64(_) => {
                Self::AuthenticationFailed
            }
            other => Self::Crypto(other),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection: "identities", id } => Self::IdentityNotFound(id),
            StoreError::NotFound { collection: "conversations", id } => Self::ConversationNotFound(id),
            StoreError::NotFound { collection: "messages", id } => Self::MessageNotFound(id),
            StoreError::AlreadyExists { collection: "identities", id } => Self::IdentityAlreadyExists(id),
            e @ StoreError::AlreadyExists { .. } => Self::InvalidInput(e.to_string()),
            e @ StoreError::PermissionDenied { .. } => Self::PermissionDenied(e.to_string()),
            e @ (StoreError::SchemaViolation { .. }
            | StoreError::UndeclaredField { .. }
            | StoreError::InvalidQuery { .. }
            | StoreError::UnsupportedSchema { .. }) => Self::SchemaViolation(e.to_string()),
            e => Self::StoreUnavailable(e.to_string()),
        }
    }
}
