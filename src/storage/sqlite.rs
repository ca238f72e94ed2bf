//! SQLite outbox store.

use std::time::Duration;

use async_trait::async_trait;
use sea_query::{ColumnDef, Expr, Order, Query, SqliteQueryBuilder, Table};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::schema::{Outbox, OutboxTable, DEFAULT_TABLE};
use super::{
    expiration_cutoff, format_timestamp, parse_timestamp, InspectStore, OutboxStore, Page,
    PageQuery, Result,
};
use crate::message::Message;

/// SQLite implementation of the outbox.
pub struct SqliteOutboxStore {
    pool: SqlitePool,
    table: OutboxTable,
}

impl SqliteOutboxStore {
    /// Open the outbox, creating its table when absent.
    ///
    /// `schema` names an attached database; the connection's main database is
    /// used when it is `None`. An empty `table` falls back to [`DEFAULT_TABLE`].
    pub async fn open(pool: SqlitePool, schema: Option<String>, table: &str) -> Result<Self> {
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

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the outbox table unless the catalog already lists it.
    ///
    /// The catalog check runs first so deployments without DDL rights can use
    /// a pre-created table; `IF NOT EXISTS` absorbs a concurrent creator.
    pub async fn ensure_table(&self) -> Result<()> {
        let lookup = format!(
            r#"SELECT COUNT(1) FROM "{}".sqlite_master WHERE type = 'table' AND name = ?"#,
            self.table.schema()
        );
        let count: i64 = sqlx::query_scalar(&lookup)
            .bind(self.table.table())
            .fetch_one(&self.pool)
            .await?;

        if count > 0 {
            debug!(schema = %self.table.schema(), table = %self.table.table(), "Outbox table already exists");
            return Ok(());
        }

        let create_table = Table::create()
            .table(self.table.table_ref())
            .if_not_exists()
            .col(ColumnDef::new(Outbox::Id).text().not_null().primary_key())
            .col(ColumnDef::new(Outbox::Metadata).text().not_null())
            .col(ColumnDef::new(Outbox::Payload).blob().not_null())
            .col(
                ColumnDef::new(Outbox::Published)
                    .boolean()
                    .not_null()
                    .default(false),
            )
            .col(
                ColumnDef::new(Outbox::CreatedAt)
                    .text()
                    .not_null()
                    // Same fixed-width microsecond form the store writes.
                    .default(Expr::cust("(strftime('%Y-%m-%dT%H:%M:%f', 'now') || '000Z')")),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&create_table).execute(&self.pool).await?;

        // SQLite qualifies the index name, not the table, with the schema.
        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS "{}"."{}" ON "{}" (published, created_at)"#,
            self.table.schema(),
            self.table.pending_index(),
            self.table.table()
        );
        sqlx::query(&create_index).execute(&self.pool).await?;

        info!(schema = %self.table.schema(), table = %self.table.table(), "Outbox table initialized (SQLite)");
        Ok(())
    }

    /// Persist messages as one multi-row insert.
    ///
    /// With `tx` the insert joins the caller's transaction, so business state
    /// and outbox rows commit together. Without it the pool is used directly.
    /// An empty slice is a no-op.
    pub async fn store(&self, tx: Option<&mut SqliteConnection>, msgs: &[Message]) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }

        // Statements hold non-Send identifiers, so render before awaiting.
        let query = {
            let mut insert = Query::insert();
            insert.into_table(self.table.table_ref()).columns([
                Outbox::Id,
                Outbox::Metadata,
                Outbox::Payload,
                Outbox::Published,
                Outbox::CreatedAt,
            ]);

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

            insert.to_string(SqliteQueryBuilder)
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
impl OutboxStore for SqliteOutboxStore {
    async fn messages(&self, batch: usize) -> Result<Vec<Message>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(self.table.table_ref())
            .and_where(Expr::col(Outbox::Published).eq(false))
            .order_by(Outbox::CreatedAt, Order::Asc)
            .limit(batch as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(decode_row).collect()
    }

    async fn published(&self, msg: &Message) -> Result<()> {
        let query = Query::update()
            .table(self.table.table_ref())
            .value(Outbox::Published, true)
            .and_where(Expr::col(Outbox::Id).eq(msg.id()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_published_by_expiration(&self, expiration: Duration) -> Result<u64> {
        let cutoff = format_timestamp(expiration_cutoff(expiration)?);

        let query = Query::delete()
            .from_table(self.table.table_ref())
            .and_where(Expr::col(Outbox::Published).eq(true))
            .and_where(Expr::col(Outbox::CreatedAt).lt(cutoff))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InspectStore for SqliteOutboxStore {
    async fn find(&self, query: PageQuery) -> Result<Page> {
        let select = Query::select()
            .columns(COLUMNS)
            .from(self.table.table_ref())
            .order_by(Outbox::CreatedAt, Order::Desc)
            .limit(u64::from(query.limit))
            .offset(query.offset())
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&select).fetch_all(&self.pool).await?;
        let messages = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

        let count = Query::select()
            .expr(Expr::col(Outbox::Id).count())
            .from(self.table.table_ref())
            .to_string(SqliteQueryBuilder);
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
            .to_string(SqliteQueryBuilder);

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

/// Name of the database the connection resolves unqualified tables in.
async fn current_schema(pool: &SqlitePool) -> Result<String> {
    let schema: String = sqlx::query_scalar("SELECT name FROM pragma_database_list WHERE seq = 0")
        .fetch_one(pool)
        .await?;
    Ok(schema)
}

fn decode_row(row: &SqliteRow) -> Result<Message> {
    let id: String = row.try_get("id")?;
    let metadata: String = row.try_get("metadata")?;
    let payload: Vec<u8> = row.try_get("payload")?;
    let published: bool = row.try_get("published")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Message::from_parts(
        id,
        serde_json::from_str(&metadata)?,
        payload,
        parse_timestamp(&created_at)?,
        published,
    ))
}
