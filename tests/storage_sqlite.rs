//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses a temporary database file, no external dependencies required.

mod storage;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use outbox_relay::message::Message;
use outbox_relay::storage::{
    InspectStore, OutboxStore, PageQuery, SqliteOutboxStore, StorageError, DEFAULT_TABLE,
};
use storage::outbox_store_tests::{message_at, OutboxHarness};

#[async_trait]
impl OutboxHarness for SqliteOutboxStore {
    async fn seed(&self, msgs: &[Message]) {
        self.store(None, msgs).await.expect("store should succeed");
    }

    async fn clear(&self) {
        let query = format!(
            r#"DELETE FROM "{}"."{}""#,
            self.table().schema(),
            self.table().table()
        );
        sqlx::query(&query)
            .execute(self.pool())
            .await
            .expect("Failed to clear outbox");
    }

    async fn bootstrap(&self) -> Result<(), StorageError> {
        self.ensure_table().await
    }

    async fn open_table(&self, table: &str) -> Result<(), StorageError> {
        SqliteOutboxStore::open(self.pool().clone(), Some(self.table().schema().to_string()), table)
            .await
            .map(|_| ())
    }
}

/// Open a pool on a fresh database file.
async fn connect(dir: &TempDir) -> SqlitePool {
    let path = dir.path().join("outbox.db");
    SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await
        .expect("Failed to connect to SQLite")
}

#[tokio::test]
async fn test_sqlite_outbox_store() {
    println!("=== SQLite OutboxStore Tests ===");

    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    let store = SqliteOutboxStore::open(pool, None, DEFAULT_TABLE)
        .await
        .expect("Failed to open outbox");

    run_outbox_store_tests!(&store);

    println!("=== All SQLite OutboxStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_resolves_main_schema() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;

    let store = SqliteOutboxStore::open(pool, None, "").await.unwrap();

    assert_eq!(store.table().schema(), "main");
    assert_eq!(store.table().table(), DEFAULT_TABLE);
}

#[tokio::test]
async fn test_sqlite_reopen_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    let first = SqliteOutboxStore::open(pool.clone(), None, "outbox").await.unwrap();
    let msg = message_at("kept", 1, false);
    first.store(None, std::slice::from_ref(&msg)).await.unwrap();

    let second = SqliteOutboxStore::open(pool, None, "outbox").await.unwrap();

    let batch = second.messages(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id(), msg.id());
}

#[tokio::test]
async fn test_sqlite_rejects_unsafe_table_name() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;

    let result = SqliteOutboxStore::open(pool, None, "bad\"name").await;

    assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));
}

async fn create_orders(pool: &SqlitePool) {
    sqlx::query("CREATE TABLE orders (id TEXT PRIMARY KEY)")
        .execute(pool)
        .await
        .expect("Failed to create orders table");
}

async fn count_orders(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(1) FROM orders")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sqlite_store_commits_with_business_write() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    create_orders(&pool).await;
    let store = SqliteOutboxStore::open(pool.clone(), None, DEFAULT_TABLE).await.unwrap();
    let msg = message_at("order placed", 1, false);

    let mut tx = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO orders (id) VALUES ('order-1')")
        .execute(&mut *tx)
        .await
        .unwrap();
    store
        .store(Some(&mut *tx), std::slice::from_ref(&msg))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(count_orders(&pool).await, 1);
    let batch = store.messages(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id(), msg.id());
}

#[tokio::test]
async fn test_sqlite_store_rolls_back_with_business_write() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    create_orders(&pool).await;
    let store = SqliteOutboxStore::open(pool.clone(), None, DEFAULT_TABLE).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO orders (id) VALUES ('order-1')")
        .execute(&mut *tx)
        .await
        .unwrap();
    store
        .store(Some(&mut *tx), &[message_at("order placed", 1, false)])
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(count_orders(&pool).await, 0);
    assert!(store.messages(10).await.unwrap().is_empty());
    assert_eq!(store.find(PageQuery::default()).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_sqlite_duplicate_id_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    let store = SqliteOutboxStore::open(pool, None, DEFAULT_TABLE).await.unwrap();
    let msg = message_at("once", 1, false);
    store.store(None, std::slice::from_ref(&msg)).await.unwrap();

    let result = store.store(None, std::slice::from_ref(&msg)).await;

    assert!(matches!(result, Err(StorageError::Database(_))));
}

#[tokio::test]
async fn test_sqlite_store_from_spawned_task() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    let store = std::sync::Arc::new(
        SqliteOutboxStore::open(pool, None, DEFAULT_TABLE).await.unwrap(),
    );
    let msg = message_at("spawned", 1, false);

    let writer = {
        let store = store.clone();
        let msg = msg.clone();
        tokio::spawn(async move { store.store(None, std::slice::from_ref(&msg)).await })
    };
    writer.await.unwrap().unwrap();

    let batch = store.messages(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id(), msg.id());
}

#[tokio::test]
async fn test_sqlite_default_created_at_sorts_with_stored_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pool = connect(&dir).await;
    let store = SqliteOutboxStore::open(pool.clone(), None, DEFAULT_TABLE).await.unwrap();

    // A row written by another producer relies on the column default.
    sqlx::query(r#"INSERT INTO "main"."messages" (id, metadata, payload) VALUES ('external', '{}', X'01')"#)
        .execute(&pool)
        .await
        .unwrap();
    let raw: String = sqlx::query_scalar(r#"SELECT created_at FROM "main"."messages" WHERE id = 'external'"#)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(raw.len(), 27, "default must match the stored width: {}", raw);
    assert!(raw.ends_with("000Z"));

    let external_at = chrono::DateTime::parse_from_rfc3339(&raw)
        .unwrap()
        .with_timezone(&chrono::Utc);
    let later = Message::from_parts(
        "later",
        Default::default(),
        b"later".to_vec(),
        external_at + chrono::Duration::microseconds(900),
        false,
    );
    store.store(None, &[later]).await.unwrap();

    let batch = store.messages(10).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(Message::id).collect();
    assert_eq!(ids, vec!["external", "later"]);
}
