//! OutboxStore and InspectStore interface tests.
//!
//! These tests verify the contract of the outbox traits.
//! Each storage implementation should run these tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use outbox_relay::message::{Message, Metadata};
use outbox_relay::storage::{InspectStore, OutboxStore, PageQuery, StorageError};

/// Backend-specific operations the contract tests need.
///
/// Writing is inherent to each store because it takes that backend's
/// transaction type, so every harness bridges it here.
#[async_trait]
pub trait OutboxHarness: OutboxStore + InspectStore {
    /// Store messages outside any caller transaction.
    async fn seed(&self, msgs: &[Message]);

    /// Remove every row from the outbox table.
    async fn clear(&self);

    /// Run schema bootstrap again against the same table.
    async fn bootstrap(&self) -> Result<(), StorageError>;

    /// Open a second store on `table` through the same connection pool.
    async fn open_table(&self, table: &str) -> Result<(), StorageError>;
}

/// Current time truncated to the microsecond precision both backends keep.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub fn message_at(payload: &str, seconds_ago: i64, published: bool) -> Message {
    Message::from_parts(
        uuid::Uuid::new_v4().to_string(),
        Metadata::new(),
        payload.as_bytes().to_vec(),
        now_micros() - chrono::Duration::seconds(seconds_ago),
        published,
    )
}

fn ids(msgs: &[Message]) -> Vec<String> {
    msgs.iter().map(|m| m.id().to_string()).collect()
}

// =============================================================================
// OutboxStore::messages tests
// =============================================================================

pub async fn test_empty_store_returns_empty_batch<S: OutboxHarness>(store: &S) {
    store.clear().await;

    let batch = store.messages(10).await.expect("messages should succeed");
    assert!(batch.is_empty(), "empty outbox should yield an empty batch");
}

pub async fn test_store_empty_slice_is_noop<S: OutboxHarness>(store: &S) {
    store.clear().await;

    store.seed(&[]).await;

    let page = store.find(PageQuery::default()).await.unwrap();
    assert_eq!(page.total, 0, "storing nothing should insert nothing");
}

pub async fn test_roundtrip_preserves_fields<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let msg = Message::from_parts(
        uuid::Uuid::new_v4().to_string(),
        Metadata::from([
            ("aggregate_id".to_string(), "order-1".to_string()),
            ("quote".to_string(), "it's \"here\"".to_string()),
        ]),
        vec![0, 159, 146, 150, b'\\', b'\''],
        now_micros(),
        false,
    );

    store.seed(std::slice::from_ref(&msg)).await;

    let batch = store.messages(1).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0], msg, "stored message should read back unchanged");
}

pub async fn test_batch_is_oldest_first_and_bounded<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let newest = message_at("newest", 1, false);
    let oldest = message_at("oldest", 300, false);
    let middle = message_at("middle", 60, false);

    store
        .seed(&[newest.clone(), oldest.clone(), middle.clone()])
        .await;

    let batch = store.messages(2).await.unwrap();
    assert_eq!(ids(&batch), ids(&[oldest, middle]));
}

pub async fn test_fifteen_messages_in_batches_of_ten<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let msgs: Vec<Message> = (0..15)
        .map(|i| message_at(&format!("m{}", i), 1000 - i, false))
        .collect();
    store.seed(&msgs).await;

    let first = store.messages(10).await.unwrap();
    assert_eq!(ids(&first), ids(&msgs[..10]), "first batch should be the 10 oldest");

    for msg in &first {
        store.published(msg).await.unwrap();
    }

    let second = store.messages(10).await.unwrap();
    assert_eq!(ids(&second), ids(&msgs[10..]), "second batch should be the remaining 5");
}

pub async fn test_batch_never_returns_published<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let done = message_at("done", 120, true);
    let todo = message_at("todo", 60, false);
    store.seed(&[done, todo.clone()]).await;

    let batch = store.messages(10).await.unwrap();
    assert_eq!(ids(&batch), ids(&[todo]));
}

// =============================================================================
// OutboxStore::published tests
// =============================================================================

pub async fn test_published_is_idempotent<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let msg = message_at("x", 1, false);
    store.seed(std::slice::from_ref(&msg)).await;

    store.published(&msg).await.expect("first published should succeed");
    store.published(&msg).await.expect("second published should succeed");

    assert!(store.messages(10).await.unwrap().is_empty());
}

pub async fn test_failed_publish_stays_pending<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let delivered = message_at("delivered", 20, false);
    let failed = message_at("failed", 10, false);
    store.seed(&[delivered.clone(), failed.clone()]).await;

    store.published(&delivered).await.unwrap();

    let batch = store.messages(10).await.unwrap();
    assert_eq!(ids(&batch), ids(&[failed]), "only the undelivered message is retried");
}

// =============================================================================
// OutboxStore::delete_published_by_expiration tests
// =============================================================================

pub async fn test_cleanup_safety<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let old_published = message_at("old-published", 7200, true);
    let old_pending = message_at("old-pending", 7200, false);
    let new_published = message_at("new-published", 5, true);
    store
        .seed(&[old_published, old_pending.clone(), new_published.clone()])
        .await;

    let deleted = store
        .delete_published_by_expiration(Duration::from_secs(3600))
        .await
        .expect("cleanup should succeed");
    assert_eq!(deleted, 1, "only the expired published row is deleted");

    let page = store.find(PageQuery::default()).await.unwrap();
    let mut remaining = ids(&page.messages);
    remaining.sort();
    let mut expected = ids(&[old_pending, new_published]);
    expected.sort();
    assert_eq!(remaining, expected);
}

// =============================================================================
// Bootstrap tests
// =============================================================================

pub async fn test_bootstrap_is_idempotent<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let msg = message_at("kept", 1, false);
    store.seed(std::slice::from_ref(&msg)).await;

    store.bootstrap().await.expect("second bootstrap should succeed");
    store.bootstrap().await.expect("third bootstrap should succeed");

    let batch = store.messages(10).await.unwrap();
    assert_eq!(ids(&batch), ids(&[msg]), "bootstrap must not touch existing rows");
}

pub async fn test_concurrent_bootstrap_of_new_table<S: OutboxHarness>(store: &S) {
    let table = format!("outbox_{}", uuid::Uuid::new_v4().simple());

    let (first, second) = tokio::join!(store.open_table(&table), store.open_table(&table));

    first.expect("first concurrent open should succeed");
    second.expect("second concurrent open should succeed");
    store.open_table(&table).await.expect("reopen should succeed");
}

// =============================================================================
// InspectStore tests
// =============================================================================

pub async fn test_find_pages_newest_first<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let msgs: Vec<Message> = (0..5)
        .map(|i| message_at(&format!("m{}", i), 500 - i * 10, i % 2 == 0))
        .collect();
    store.seed(&msgs).await;

    let first = store.find(PageQuery::new(1, 2)).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(ids(&first.messages), ids(&[msgs[4].clone(), msgs[3].clone()]));

    let last = store.find(PageQuery::new(3, 2)).await.unwrap();
    assert_eq!(ids(&last.messages), ids(&[msgs[0].clone()]));

    let zero = store.find(PageQuery::new(0, 2)).await.unwrap();
    assert_eq!(ids(&zero.messages), ids(&first.messages), "page 0 is treated as page 1");
}

pub async fn test_republish_resets_published<S: OutboxHarness>(store: &S) {
    store.clear().await;
    let a = message_at("a", 20, true);
    let b = message_at("b", 10, true);
    store.seed(&[a.clone(), b]).await;

    let updated = store
        .republish(&[a.id().to_string(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(updated, 1, "unknown ids are skipped");

    let batch = store.messages(10).await.unwrap();
    assert_eq!(ids(&batch), ids(&[a]));

    assert_eq!(store.republish(&[]).await.unwrap(), 0);
}

/// Run all OutboxStore/InspectStore interface tests.
#[macro_export]
macro_rules! run_outbox_store_tests {
    ($store:expr) => {
        use $crate::storage::outbox_store_tests::*;

        // messages tests
        test_empty_store_returns_empty_batch($store).await;
        println!("  test_empty_store_returns_empty_batch: PASSED");

        test_store_empty_slice_is_noop($store).await;
        println!("  test_store_empty_slice_is_noop: PASSED");

        test_roundtrip_preserves_fields($store).await;
        println!("  test_roundtrip_preserves_fields: PASSED");

        test_batch_is_oldest_first_and_bounded($store).await;
        println!("  test_batch_is_oldest_first_and_bounded: PASSED");

        test_fifteen_messages_in_batches_of_ten($store).await;
        println!("  test_fifteen_messages_in_batches_of_ten: PASSED");

        test_batch_never_returns_published($store).await;
        println!("  test_batch_never_returns_published: PASSED");

        // published tests
        test_published_is_idempotent($store).await;
        println!("  test_published_is_idempotent: PASSED");

        test_failed_publish_stays_pending($store).await;
        println!("  test_failed_publish_stays_pending: PASSED");

        // cleanup tests
        test_cleanup_safety($store).await;
        println!("  test_cleanup_safety: PASSED");

        // bootstrap tests
        test_bootstrap_is_idempotent($store).await;
        println!("  test_bootstrap_is_idempotent: PASSED");

        test_concurrent_bootstrap_of_new_table($store).await;
        println!("  test_concurrent_bootstrap_of_new_table: PASSED");

        // inspection tests
        test_find_pages_newest_first($store).await;
        println!("  test_find_pages_newest_first: PASSED");

        test_republish_resets_published($store).await;
        println!("  test_republish_resets_published: PASSED");
    };
}
