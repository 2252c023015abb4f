use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use connect_crypto::kdf::KdfParams;

use crate::error::CoreError;

/// Runtime knobs for the chat core. Every field has a default; environment
/// variables override them.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    /// Rows fetched per page and deleted per batch by the wipe operations.
    pub delete_batch_size: usize,
    /// Deletes in flight at once within a batch.
    pub delete_concurrency: usize,
    /// Inactivity before the vault locks itself. `None` disables auto-lock.
    pub auto_lock_after: Option<Duration>,
    /// Argon2id cost for newly published identities.
    pub kdf: KdfParams,
    /// Messages returned by `read_messages`.
    pub page_size: u32,
    /// Store plaintext when sending to an encrypted conversation with the vault locked.
    pub plaintext_fallback: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(10_000),
            delete_batch_size: 100,
            delete_concurrency: 4,
            auto_lock_after: Some(Duration::from_secs(1800)),
            kdf: KdfParams::default(),
            page_size: 50,
            plaintext_fallback: false,
        }
    }
}

impl CoreConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout_ms: u64 = parse(&lookup, "CONNECT_STORE_TIMEOUT_MS", 10_000)?;
        let auto_lock_secs: u64 = parse(&lookup, "CONNECT_AUTO_LOCK_SECS", 1800)?;

        let config = Self {
            store_timeout: Duration::from_millis(timeout_ms),
            delete_batch_size: parse(&lookup, "CONNECT_DELETE_BATCH_SIZE", defaults.delete_batch_size)?,
            delete_concurrency: parse(&lookup, "CONNECT_DELETE_CONCURRENCY", defaults.delete_concurrency)?,
            auto_lock_after: (auto_lock_secs > 0).then(|| Duration::from_secs(auto_lock_secs)),
            kdf: KdfParams {
                memory_kib: parse(&lookup, "CONNECT_KDF_MEMORY_KIB", defaults.kdf.memory_kib)?,
                iterations: parse(&lookup, "CONNECT_KDF_ITERATIONS", defaults.kdf.iterations)?,
                parallelism: parse(&lookup, "CONNECT_KDF_PARALLELISM", defaults.kdf.parallelism)?,
            },
            page_size: parse(&lookup, "CONNECT_PAGE_SIZE", defaults.page_size)?,
            plaintext_fallback: parse_bool(&lookup, "CONNECT_PLAINTEXT_FALLBACK", defaults.plaintext_fallback)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.store_timeout.is_zero() {
            return Err(CoreError::Config("CONNECT_STORE_TIMEOUT_MS must be positive".into()));
        }
        if self.delete_batch_size == 0 {
            return Err(CoreError::Config("CONNECT_DELETE_BATCH_SIZE must be positive".into()));
        }
        if self.delete_concurrency == 0 {
            return Err(CoreError::Config("CONNECT_DELETE_CONCURRENCY must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(CoreError::Config("CONNECT_PAGE_SIZE must be positive".into()));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Config(format!("{}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(CoreError::Config(format!("{}='{}' is not a boolean", key, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<CoreConfig, CoreError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        CoreConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.store_timeout, Duration::from_secs(10));
        assert_eq!(config.delete_batch_size, 100);
        assert_eq!(config.auto_lock_after, Some(Duration::from_secs(1800)));
        assert_eq!(config.kdf, KdfParams::default());
        assert!(!config.plaintext_fallback);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("CONNECT_DELETE_BATCH_SIZE", "25"),
            ("CONNECT_AUTO_LOCK_SECS", "0"),
            ("CONNECT_KDF_MEMORY_KIB", "1024"),
            ("CONNECT_PLAINTEXT_FALLBACK", "true"),
        ])
        .unwrap();
        assert_eq!(config.delete_batch_size, 25);
        assert_eq!(config.auto_lock_after, None);
        assert_eq!(config.kdf.memory_kib, 1024);
        assert!(config.plaintext_fallback);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(load(&[("CONNECT_PAGE_SIZE", "many")]), Err(CoreError::Config(_))));
        assert!(matches!(load(&[("CONNECT_DELETE_CONCURRENCY", "0")]), Err(CoreError::Config(_))));
        assert!(matches!(load(&[("CONNECT_PLAINTEXT_FALLBACK", "maybe")]), Err(CoreError::Config(_))));
    }
}
