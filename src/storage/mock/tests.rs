use chrono::Utc;

use super::*;
use crate::message::Metadata;

fn message_at(payload: &str, seconds_ago: i64, published: bool) -> Message {
    Message::from_parts(
        uuid::Uuid::new_v4().to_string(),
        Metadata::new(),
        payload.as_bytes().to_vec(),
        Utc::now() - chrono::Duration::seconds(seconds_ago),
        published,
    )
}

#[tokio::test]
async fn test_messages_oldest_first_and_bounded() {
    let store = MockOutboxStore::new();
    let newest = message_at("newest", 1, false);
    let oldest = message_at("oldest", 30, false);
    let middle = message_at("middle", 10, false);
    store
        .store(&[newest.clone(), oldest.clone(), middle.clone()])
        .await
        .unwrap();

    let batch = store.messages(2).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id(), oldest.id());
    assert_eq!(batch[1].id(), middle.id());
}

#[tokio::test]
async fn test_messages_skips_published() {
    let store = MockOutboxStore::new();
    store
        .store(&[message_at("done", 5, true), message_at("todo", 1, false)])
        .await
        .unwrap();

    let batch = store.messages(10).await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload(), b"todo");
}

#[tokio::test]
async fn test_published_is_idempotent() {
    let store = MockOutboxStore::new();
    let msg = message_at("x", 1, false);
    store.store(&[msg.clone()]).await.unwrap();

    store.published(&msg).await.unwrap();
    store.published(&msg).await.unwrap();

    assert_eq!(store.is_published(msg.id()).await, Some(true));
    assert!(store.messages(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_keeps_unpublished_and_recent() {
    let store = MockOutboxStore::new();
    let old_published = message_at("old-published", 3600, true);
    let old_pending = message_at("old-pending", 3600, false);
    let new_published = message_at("new-published", 1, true);
    store
        .store(&[old_published.clone(), old_pending.clone(), new_published.clone()])
        .await
        .unwrap();

    let deleted = store
        .delete_published_by_expiration(Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(store.is_published(old_published.id()).await, None);
    assert_eq!(store.is_published(old_pending.id()).await, Some(false));
    assert_eq!(store.is_published(new_published.id()).await, Some(true));
}

#[tokio::test]
async fn test_failure_toggles() {
    let store = MockOutboxStore::new();
    let msg = message_at("x", 1, false);
    store.store(&[msg.clone()]).await.unwrap();

    store.set_fail_on_messages(true).await;
    assert!(store.messages(1).await.is_err());

    store.fail_published_for(msg.id()).await;
    assert!(store.published(&msg).await.is_err());

    store.set_fail_on_delete(true).await;
    assert!(store
        .delete_published_by_expiration(Duration::from_secs(1))
        .await
        .is_err());
}

#[tokio::test]
async fn test_find_pages_newest_first() {
    let store = MockOutboxStore::new();
    let msgs: Vec<Message> = (0..5)
        .map(|i| message_at(&format!("m{}", i), 100 - i, i % 2 == 0))
        .collect();
    store.store(&msgs).await.unwrap();

    let page = store.find(PageQuery::new(2, 2)).await.unwrap();

    assert_eq!(page.total, 5);
    assert_eq!(page.messages.len(), 2);
    assert_eq!(page.messages[0].payload(), b"m2");
    assert_eq!(page.messages[1].payload(), b"m1");
}

#[tokio::test]
async fn test_republish_resets_flag() {
    let store = MockOutboxStore::new();
    let msg = message_at("x", 1, true);
    store.store(&[msg.clone()]).await.unwrap();

    let updated = store
        .republish(&[msg.id().to_string(), "unknown".to_string()])
        .await
        .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(store.messages(10).await.unwrap().len(), 1);
}
