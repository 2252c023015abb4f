mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use connect_core::{CoreError, Recovery};
use connect_db::MessageStore;
use connect_types::models::MessageKind;

use common::{FlakyStore, SlowStore, config, database, init_tracing, message_rows, signed_in};

#[tokio::test]
async fn failed_deletes_are_reported_not_fatal() {
    init_tracing();
    let db = database();
    let mut config = config();
    config.delete_batch_size = 4;
    config.delete_concurrency = 2;
    let store: Arc<dyn MessageStore> = Arc::new(FlakyStore::new(db.clone(), 3));

    let alice = signed_in(store.clone(), &config).await;
    let bob = signed_in(store.clone(), &config).await;
    let conversation_id = alice
        .create_encrypted_conversation(BTreeSet::from([bob.user_id()]))
        .await
        .unwrap()
        .conversation
        .id;
    for i in 0..10 {
        alice
            .send_message(conversation_id, alice.user_id(), &format!("message {}", i), MessageKind::Text)
            .await
            .unwrap();
    }

    let report = alice.wipe_my_footprint(conversation_id, alice.user_id()).await.unwrap();
    assert_eq!(report.requested, 10);
    assert_eq!(report.deleted, 7);
    assert_eq!(report.failed.len(), 3);
    assert!(!report.is_complete());
    assert!(report.failed.iter().all(|f| f.reason.contains("injected")));

    let left: BTreeSet<_> = message_rows(&db, conversation_id, alice.user_id())
        .into_iter()
        .map(|r| r.id)
        .collect();
    let failed: BTreeSet<_> = report.failed.iter().map(|f| f.message_id).collect();
    assert_eq!(left, failed);
}

#[tokio::test]
async fn slow_store_surfaces_as_unavailable() {
    init_tracing();
    let db = database();
    let mut config = config();
    config.store_timeout = Duration::from_millis(50);
    let store: Arc<dyn MessageStore> = Arc::new(SlowStore {
        inner: db.clone(),
        delay: Duration::from_millis(300),
    });

    let alice = signed_in(store.clone(), &config).await;
    let conversation_id = alice
        .create_encrypted_conversation(BTreeSet::new())
        .await
        .unwrap()
        .conversation
        .id;

    let err = alice
        .read_messages(conversation_id, alice.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StoreUnavailable(_)));
    assert_eq!(err.recovery(), Recovery::RetryWithBackoff);
}
