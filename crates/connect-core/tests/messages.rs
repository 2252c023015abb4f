mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use connect_core::CoreError;
use connect_types::api::{Content, SendMessageRequest, Unreadable};
use connect_types::models::MessageKind;

use common::{config, database, init_tracing, message_rows, signed_in};

#[tokio::test]
async fn attachments_are_sealed_at_rest() {
    init_tracing();
    let db = database();
    let config = config();
    let alice = signed_in(db.clone(), &config).await;
    let bob = signed_in(db.clone(), &config).await;

    let conversation_id = alice
        .create_encrypted_conversation(BTreeSet::from([bob.user_id()]))
        .await
        .unwrap()
        .conversation
        .id;
    let url = "https://files.example.net/u/alice/holiday.jpg";
    let request = SendMessageRequest::new("", MessageKind::Image).with_attachments(vec![url.into()]);
    let sent = alice
        .send_message_with(conversation_id, alice.user_id(), request)
        .await
        .unwrap();
    assert_eq!(sent.attachments, vec![Content::Plain(url.into())]);

    let rows = message_rows(&db, conversation_id, alice.user_id());
    let stored = rows[0].data["attachments"][0].as_str().unwrap();
    assert_ne!(stored, url);
    assert!(!stored.contains("holiday"));

    let for_bob = bob.read_messages(conversation_id, bob.user_id()).await.unwrap();
    assert_eq!(for_bob[0].attachments, vec![Content::Plain(url.into())]);

    let view = bob.get_conversation(conversation_id).await.unwrap();
    assert_eq!(view.last_message_preview, Some(Content::Plain("[Image]".into())));

    bob.lock();
    let locked = bob.read_messages(conversation_id, bob.user_id()).await.unwrap();
    assert_eq!(locked[0].attachments, vec![Content::Unreadable(Unreadable::VaultLocked)]);
}

#[tokio::test]
async fn replies_must_stay_in_their_conversation() {
    init_tracing();
    let db = database();
    let config = config();
    let alice = signed_in(db.clone(), &config).await;
    let bob = signed_in(db.clone(), &config).await;

    let here = alice
        .create_encrypted_conversation(BTreeSet::from([bob.user_id()]))
        .await
        .unwrap()
        .conversation
        .id;
    let elsewhere = alice
        .create_encrypted_conversation(BTreeSet::new())
        .await
        .unwrap()
        .conversation
        .id;
    let question = alice
        .send_message(here, alice.user_id(), "lunch?", MessageKind::Text)
        .await
        .unwrap();
    let note = alice
        .send_message(elsewhere, alice.user_id(), "buy milk", MessageKind::Text)
        .await
        .unwrap();

    let reply = SendMessageRequest::new("yes", MessageKind::Text).replying_to(question.id);
    let answer = bob.send_message_with(here, bob.user_id(), reply).await.unwrap();
    assert_eq!(answer.reply_to, Some(question.id));
    let read = alice.read_messages(here, alice.user_id()).await.unwrap();
    assert_eq!(read.iter().find(|m| m.id == answer.id).unwrap().reply_to, Some(question.id));

    let cross = SendMessageRequest::new("hm", MessageKind::Text).replying_to(note.id);
    assert!(matches!(
        alice.send_message_with(here, alice.user_id(), cross).await,
        Err(CoreError::InvalidInput(_))
    ));

    let dangling = SendMessageRequest::new("hm", MessageKind::Text).replying_to(uuid::Uuid::new_v4());
    assert!(matches!(
        alice.send_message_with(here, alice.user_id(), dangling).await,
        Err(CoreError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn only_the_sender_deletes_a_message() {
    init_tracing();
    let db = database();
    let config = config();
    let alice = signed_in(db.clone(), &config).await;
    let bob = signed_in(db.clone(), &config).await;

    let conversation_id = alice
        .create_encrypted_conversation(BTreeSet::from([bob.user_id()]))
        .await
        .unwrap()
        .conversation
        .id;
    let sent = alice
        .send_message(conversation_id, alice.user_id(), "typo", MessageKind::Text)
        .await
        .unwrap();

    assert!(matches!(bob.delete_message(sent.id).await, Err(CoreError::PermissionDenied(_))));
    alice.delete_message(sent.id).await.unwrap();

    assert!(message_rows(&db, conversation_id, alice.user_id()).is_empty());
    assert!(matches!(alice.delete_message(sent.id).await, Err(CoreError::MessageNotFound(_))));

    let view = bob.get_conversation(conversation_id).await.unwrap();
    assert_eq!(view.last_message_preview, None);
}

#[tokio::test]
async fn deleting_the_last_message_moves_the_preview_back() {
    init_tracing();
    let db = database();
    let config = config();
    let alice = signed_in(db.clone(), &config).await;
    let bob = signed_in(db.clone(), &config).await;

    let conversation_id = alice
        .create_encrypted_conversation(BTreeSet::from([bob.user_id()]))
        .await
        .unwrap()
        .conversation
        .id;
    let first = bob
        .send_message(conversation_id, bob.user_id(), "see you at noon", MessageKind::Text)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let last = alice
        .send_message(conversation_id, alice.user_id(), "wrong chat, sorry", MessageKind::Text)
        .await
        .unwrap();

    alice.delete_message(last.id).await.unwrap();

    let view = bob.get_conversation(conversation_id).await.unwrap();
    assert_eq!(view.last_message_preview, Some(Content::Plain("see you at noon".into())));
    assert_eq!(view.last_message_at, Some(first.created_at));
    let texts: Vec<_> = bob
        .read_messages(conversation_id, bob.user_id())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(texts, vec![Content::Plain("see you at noon".into())]);
}
