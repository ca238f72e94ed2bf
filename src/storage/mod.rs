//! Outbox storage.
//!
//! This module contains:
//! - `OutboxStore` trait: the delivery worker's view of the outbox
//! - `InspectStore` trait: paginated listing and republish for tooling
//! - Implementations: SQLite, PostgreSQL, Mock
//!
//! Writing messages is backend specific because it participates in the
//! caller's transaction, so every concrete store exposes an inherent
//! `store(tx, msgs)` method taking that backend's connection type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::message::Message;

pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockOutboxStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresOutboxStore;
pub use schema::{OutboxTable, DEFAULT_TABLE};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOutboxStore;

/// Page size used by inspection queries when none is given.
pub const DEFAULT_PAGE_LIMIT: u32 = 25;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Missing schema name")]
    MissingSchema,

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Outbox operations used by the delivery worker.
///
/// Implementations:
/// - `SqliteOutboxStore`: SQLite
/// - `PostgresOutboxStore`: PostgreSQL
/// - `MockOutboxStore`: In-memory mock for testing
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `batch` unpublished messages, oldest `created_at` first.
    ///
    /// Returns an empty vector when nothing is pending.
    async fn messages(&self, batch: usize) -> Result<Vec<Message>>;

    /// Mark one message as published. Repeated calls are no-ops.
    async fn published(&self, msg: &Message) -> Result<()>;

    /// Hard-delete published messages created more than `expiration` ago.
    ///
    /// Unpublished messages are never deleted, whatever their age.
    /// Returns the number of deleted rows.
    async fn delete_published_by_expiration(&self, expiration: Duration) -> Result<u64>;
}

/// Pagination request for inspection listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page number. Values below 1 are treated as 1.
    pub page: u32,
    pub limit: u32,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageQuery {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

/// One page of stored messages, newest first.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Page {
    /// Total number of stored messages, across all pages.
    pub total: u64,
    pub messages: Vec<Message>,
}

/// Read/update surface consumed by inspection tooling.
#[async_trait]
pub trait InspectStore: Send + Sync {
    /// List stored messages, published or not, newest first.
    async fn find(&self, query: PageQuery) -> Result<Page>;

    /// Flip `published` back to false for the given ids. Unknown ids are skipped.
    async fn republish(&self, ids: &[String]) -> Result<u64>;
}

/// Instant before which published messages count as expired.
pub(crate) fn expiration_cutoff(expiration: Duration) -> Result<DateTime<Utc>> {
    let expiration = chrono::Duration::from_std(expiration)
        .map_err(|e| StorageError::InvalidTimestamp(format!("expiration out of range: {}", e)))?;
    Ok(Utc::now() - expiration)
}

/// Fixed-width UTC timestamp. Text columns compare in chronological order.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg_attr(not(feature = "sqlite"), allow(dead_code))]
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", value, e)))
}

/// Initialize the outbox store based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn OutboxStore>, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let path = &config.sqlite.path;
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }

                let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?;
                let store =
                    SqliteOutboxStore::open(pool, config.schema.clone(), &config.table).await?;
                info!(storage_type = "sqlite", path = %path, "Outbox storage initialized");
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err("SQLite support requires the 'sqlite' feature. Rebuild with --features sqlite".into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::PgPool::connect(&config.postgres.uri).await?;
                let store =
                    PostgresOutboxStore::open(pool, config.schema.clone(), &config.table).await?;
                info!(storage_type = "postgres", "Outbox storage initialized");
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err("PostgreSQL support requires the 'postgres' feature. Rebuild with --features postgres".into())
            }
        }
    }
}
