#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use uuid::Uuid;

use connect_core::{ChatService, CoreConfig, IdentityKeyStore};
use connect_crypto::kdf::KdfParams;
use connect_db::{Collection, Database, MessageStore, Permissions, Query, Row, StoreError};

pub const PASSPHRASE: &str = "correct horse battery";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connect_core=debug,connect_db=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn config() -> CoreConfig {
    CoreConfig {
        kdf: KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..CoreConfig::default()
    }
}

pub fn database() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

/// Publish an identity for a fresh user and return their unlocked session.
pub async fn signed_in(store: Arc<dyn MessageStore>, config: &CoreConfig) -> ChatService {
    let user_id = Uuid::new_v4();
    let identities = IdentityKeyStore::new(store.clone(), config);
    identities.publish_identity(user_id, PASSPHRASE).await.unwrap();
    session(store, config, user_id).await
}

/// Open and unlock an existing user's session.
pub async fn session(store: Arc<dyn MessageStore>, config: &CoreConfig, user_id: Uuid) -> ChatService {
    let identities = IdentityKeyStore::new(store.clone(), config);
    let vault = identities.open_vault(user_id).await.unwrap();
    vault.unlock(PASSPHRASE).await.unwrap();
    ChatService::new(store, vault, config.clone())
}

/// Delegates to a real database, failing every `fail_every`-th delete.
pub struct FlakyStore {
    pub inner: Arc<Database>,
    pub fail_every: usize,
    pub deletes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>, fail_every: usize) -> Self {
        Self {
            inner,
            fail_every,
            deletes: AtomicUsize::new(0),
        }
    }
}

impl MessageStore for FlakyStore {
    fn create_row(
        &self,
        collection: Collection,
        id: Uuid,
        data: Map<String, Value>,
        permissions: Permissions,
    ) -> Result<Row, StoreError> {
        self.inner.create_row(collection, id, data, permissions)
    }

    fn get_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<Row, StoreError> {
        self.inner.get_row(collection, id, actor)
    }

    fn update_row(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Uuid,
        patch: Map<String, Value>,
        permissions: Option<Permissions>,
    ) -> Result<Row, StoreError> {
        self.inner.update_row(collection, id, actor, patch, permissions)
    }

    fn delete_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<(), StoreError> {
        let n = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.fail_every == 0 {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_row(collection, id, actor)
    }

    fn list_rows(&self, collection: Collection, actor: Uuid, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.inner.list_rows(collection, actor, query)
    }
}

/// Delegates to a real database, but every listing blocks past any sane timeout.
pub struct SlowStore {
    pub inner: Arc<Database>,
    pub delay: Duration,
}

impl MessageStore for SlowStore {
    fn create_row(
        &self,
        collection: Collection,
        id: Uuid,
        data: Map<String, Value>,
        permissions: Permissions,
    ) -> Result<Row, StoreError> {
        self.inner.create_row(collection, id, data, permissions)
    }

    fn get_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<Row, StoreError> {
        self.inner.get_row(collection, id, actor)
    }

    fn update_row(
        &self,
        collection: Collection,
        id: Uuid,
        actor: Uuid,
        patch: Map<String, Value>,
        permissions: Option<Permissions>,
    ) -> Result<Row, StoreError> {
        self.inner.update_row(collection, id, actor, patch, permissions)
    }

    fn delete_row(&self, collection: Collection, id: Uuid, actor: Uuid) -> Result<(), StoreError> {
        self.inner.delete_row(collection, id, actor)
    }

    fn list_rows(&self, collection: Collection, actor: Uuid, query: &Query) -> Result<Vec<Row>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.list_rows(collection, actor, query)
    }
}

/// Every message row in a conversation, as seen by `actor`.
pub fn message_rows(db: &Database, conversation_id: Uuid, actor: Uuid) -> Vec<Row> {
    let query = Query::new().equal("conversationId", conversation_id.to_string());
    db.list_rows(Collection::Messages, actor, &query).unwrap()
}
