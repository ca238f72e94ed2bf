//! PostgreSQL outbox store.
//!
//! Metadata is stored as `JSONB`, payload as `BYTEA` and `created_at` as
//! `TIMESTAMPTZ`, so cleanup compares real timestamps on the server.

use std::time::Duration;

use async_trait::async_trait;
use sea_query::{Alias, ColumnDef, Expr, Index, Order, PostgresQueryBuilder, Query, Table};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};

use super::schema::{Outbox, OutboxTable, DEFAULT_TABLE};
use super::{
    expiration_cutoff, format_timestamp, InspectStore, OutboxStore, Page, PageQuery, Result,
    StorageError,
};
use crate::message::{Message, Metadata};

/// PostgreSQL implementation of the outbox.
pub struct PostgresOutboxStore {
    pool: PgPool,
    table: OutboxTable,
}

impl PostgresOutboxStore {
    /// Open the outbox, creating its table when absent.
    ///
    /// Without an explicit `schema` the connection's `CURRENT_SCHEMA()` is
    /// used; a connection without one fails with [`StorageError::MissingSchema`].
    pub async fn open(pool: PgPool, schema: Option<String>, table: &str) -> Result<Self> {
        let schema = match schema {
            Some(schema) => schema,
            None => current_schema(&pool).await?,
        };
        let table = if table.is_empty() { DEFAULT_TABLE } else { table };

        let store = Self {
            pool,
            table: OutboxTable::new(schema, table)?,
        };
        store.ensure_table().await?;

        Ok(store)
    }

    pub fn table(&self) -> &OutboxTable {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the outbox table unless `information_schema` already lists it.
    ///
    /// Concurrent `CREATE TABLE IF NOT EXISTS` can still collide on the type
    /// catalog, so a failed create succeeds when the table is there afterwards.
    pub async fn ensure_table(&self) -> Result<()> {
        if self.table_exists().await? {
            debug!(schema = %self.table.schema(), table = %self.table.table(), "Outbox table already exists");
            return Ok(());
        }

        let create_table = Table::create()
            .table(self.table.table_ref())
            .if_not_exists()
            .col(ColumnDef::new(Outbox::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Outbox::Metadata).json_binary().not_null())
            .col(ColumnDef::new(Outbox::Payload).blob().not_null())
            .col(
                ColumnDef::new(Outbox::Published)
                    .boolean()
                    .not_null()
                    .default(false),
            )
            .col(
                ColumnDef::new(Outbox::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .to_string(PostgresQueryBuilder);

        let create_index = Index::create()
            .if_not_exists()
            .name(self.table.pending_index())
            .table(self.table.table_ref())
            .col(Outbox::Published)
            .col(Outbox::CreatedAt)
            .to_string(PostgresQueryBuilder);

        if let Err(e) = self.create(&create_table, &create_index).await {
            if self.table_exists().await? {
                debug!(error = %e, table = %self.table.table(), "Outbox table created concurrently");
                return Ok(());
            }
            return Err(e);
        }

        info!(schema = %self.table.schema(), table = %self.table.table(), "Outbox table initialized (PostgreSQL)");
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(self.table.schema())
        .bind(self.table.table())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn create(&self, create_table: &str, create_index: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(create_table).execute(&mut *tx).await?;
        sqlx::query(create_index).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist messages as one multi-row insert.
    ///
    /// With `tx` the insert joins the caller's transaction. An empty slice is
    /// a no-op.
    pub async fn store(&self, tx: Option<&mut PgConnection>, msgs: &[Message]) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }

        // Statements hold non-Send identifiers, so render before awaiting.
        let query = {
            let mut insert = Query::insert();
            insert.into_table(self.table.table_ref()).columns(COLUMNS);

            for msg in msgs {
                let metadata = serde_json::to_string(msg.metadata())?;
                insert.values_panic([
                    msg.id().into(),
                    metadata.into(),
                    msg.payload().to_vec().into(),
                    msg.published().into(),
                    format_timestamp(msg.created_at()).into(),
                ]);
            }

            insert.to_string(PostgresQueryBuilder)
        };

        match tx {
            Some(conn) => sqlx::query(&query).execute(&mut *conn).await?,
            None => sqlx::query(&query).execute(&self.pool).await?,
        };

        debug!(count = msgs.len(), "Messages written to outbox");
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn messages(&self, batch: usize) -> Result<Vec<Message>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(self.table.table_ref())
            .and_where(Expr::col(Outbox::Published).eq(false))
            .order_by(Outbox::CreatedAt, Order::Asc)
            .limit(batch as u64)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(decode_row).collect()
    }

    async fn published(&self, msg: &Message) -> Result<()> {
        let query = Query::update()
            .table(self.table.table_ref())
            .value(Outbox::Published, true)
            .and_where(Expr::col(Outbox::Id).eq(msg.id()))
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_published_by_expiration(&self, expiration: Duration) -> Result<u64> {
        let cutoff = format_timestamp(expiration_cutoff(expiration)?);

        let query = Query::delete()
            .from_table(self.table.table_ref())
            .and_where(Expr::col(Outbox::Published).eq(true))
            .and_where(
                Expr::col(Outbox::CreatedAt).lt(Expr::val(cutoff).cast_as(Alias::new("timestamptz"))),
            )
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InspectStore for PostgresOutboxStore {
    async fn find(&self, query: PageQuery) -> Result<Page> {
        let select = Query::select()
            .columns(COLUMNS)
            .from(self.table.table_ref())
            .order_by(Outbox::CreatedAt, Order::Desc)
            .limit(u64::from(query.limit))
            .offset(query.offset())
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&select).fetch_all(&self.pool).await?;
        let messages = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

        let count = Query::select()
            .expr(Expr::col(Outbox::Id).count())
            .from(self.table.table_ref())
            .to_string(PostgresQueryBuilder);
        let total: i64 = sqlx::query(&count).fetch_one(&self.pool).await?.try_get(0)?;

        Ok(Page {
            total: total.max(0) as u64,
            messages,
        })
    }

    async fn republish(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let query = Query::update()
            .table(self.table.table_ref())
            .value(Outbox::Published, false)
            .and_where(Expr::col(Outbox::Id).is_in(ids.iter().map(String::as_str)))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

const COLUMNS: [Outbox; 5] = [
    Outbox::Id,
    Outbox::Metadata,
    Outbox::Payload,
    Outbox::Published,
    Outbox::CreatedAt,
];

async fn current_schema(pool: &PgPool) -> Result<String> {
    let schema: Option<String> = sqlx::query_scalar("SELECT CURRENT_SCHEMA()")
        .fetch_one(pool)
        .await?;
    schema
        .filter(|s| !s.is_empty())
        .ok_or(StorageError::MissingSchema)
}

fn decode_row(row: &PgRow) -> Result<Message> {
    let Json(metadata): Json<Metadata> = row.try_get("metadata")?;

    Ok(Message::from_parts(
        row.try_get::<String, _>("id")?,
        metadata,
        row.try_get::<Vec<u8>, _>("payload")?,
        row.try_get("created_at")?,
        row.try_get("published")?,
    ))
}
