//! Outbox table schema using sea-query.
//!
//! Column identifiers are fixed; schema and table names are configurable and
//! resolved at store construction, so they are carried by [`OutboxTable`].

use sea_query::{Alias, Iden, IntoTableRef, TableRef};

use super::{Result, StorageError};

/// Table name used when none is configured.
pub const DEFAULT_TABLE: &str = "messages";

/// Outbox table columns.
#[derive(Iden, Clone, Copy)]
pub enum Outbox {
    #[iden = "id"]
    Id,
    #[iden = "metadata"]
    Metadata,
    #[iden = "payload"]
    Payload,
    #[iden = "published"]
    Published,
    #[iden = "created_at"]
    CreatedAt,
}

/// Fully resolved location of the outbox table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxTable {
    schema: String,
    table: String,
}

impl OutboxTable {
    /// Build a table location, rejecting identifiers that cannot be quoted safely.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let table = table.into();

        if schema.is_empty() {
            return Err(StorageError::MissingSchema);
        }
        validate_identifier(&schema)?;
        validate_identifier(&table)?;

        Ok(Self { schema, table })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Schema-qualified reference for sea-query statements.
    pub fn table_ref(&self) -> TableRef {
        (Alias::new(&self.schema), Alias::new(&self.table)).into_table_ref()
    }

    /// Name of the index backing the unpublished-batch query.
    pub fn pending_index(&self) -> String {
        format!("idx_{}_pending", self.table)
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        return Err(StorageError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
