//! Mock outbox store for testing.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{expiration_cutoff, InspectStore, OutboxStore, Page, PageQuery, Result, StorageError};
use crate::message::Message;

#[cfg(test)]
mod tests;

/// Mock outbox store that keeps messages in memory.
///
/// Insertion order stands in for commit order; reads sort by `created_at`
/// like the SQL stores do.
#[derive(Default)]
pub struct MockOutboxStore {
    messages: RwLock<Vec<Message>>,
    fail_on_messages: RwLock<bool>,
    fail_on_published: RwLock<HashSet<String>>,
    fail_on_delete: RwLock<bool>,
}

impl MockOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append messages. An empty slice is a no-op.
    pub async fn store(&self, msgs: &[Message]) -> Result<()> {
        self.messages.write().await.extend_from_slice(msgs);
        Ok(())
    }

    pub async fn set_fail_on_messages(&self, fail: bool) {
        *self.fail_on_messages.write().await = fail;
    }

    /// Make `published` fail for the message with the given id.
    pub async fn fail_published_for(&self, id: impl Into<String>) {
        self.fail_on_published.write().await.insert(id.into());
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn all(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn is_published(&self, id: &str) -> Option<bool> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id() == id)
            .map(Message::published)
    }
}

fn with_published(msg: &Message, published: bool) -> Message {
    Message::from_parts(
        msg.id(),
        msg.metadata().clone(),
        msg.payload().to_vec(),
        msg.created_at(),
        published,
    )
}

#[async_trait]
impl OutboxStore for MockOutboxStore {
    async fn messages(&self, batch: usize) -> Result<Vec<Message>> {
        if *self.fail_on_messages.read().await {
            return Err(StorageError::Unavailable("Mock messages failure".to_string()));
        }

        let mut pending: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| !m.published())
            .cloned()
            .collect();
        pending.sort_by_key(Message::created_at);
        pending.truncate(batch);

        Ok(pending)
    }

    async fn published(&self, msg: &Message) -> Result<()> {
        if self.fail_on_published.read().await.contains(msg.id()) {
            return Err(StorageError::Unavailable(format!(
                "Mock published failure for {}",
                msg.id()
            )));
        }

        let mut messages = self.messages.write().await;
        if let Some(stored) = messages.iter_mut().find(|m| m.id() == msg.id()) {
            *stored = with_published(stored, true);
        }
        Ok(())
    }

    async fn delete_published_by_expiration(&self, expiration: Duration) -> Result<u64> {
        if *self.fail_on_delete.read().await {
            return Err(StorageError::Unavailable("Mock delete failure".to_string()));
        }

        let cutoff = expiration_cutoff(expiration)?;
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| !(m.published() && m.created_at() < cutoff));

        Ok((before - messages.len()) as u64)
    }
}

#[async_trait]
impl InspectStore for MockOutboxStore {
    async fn find(&self, query: PageQuery) -> Result<Page> {
        let mut messages = self.messages.read().await.clone();
        let total = messages.len() as u64;
        messages.sort_by_key(|m| std::cmp::Reverse(m.created_at()));

        let messages = messages
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();

        Ok(Page { total, messages })
    }

    async fn republish(&self, ids: &[String]) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let mut updated = 0;
        for stored in messages.iter_mut().filter(|m| ids.iter().any(|id| id == m.id())) {
            *stored = with_published(stored, false);
            updated += 1;
        }
        Ok(updated)
    }
}
