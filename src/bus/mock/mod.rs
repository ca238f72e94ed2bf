//! Mock broker implementations for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::consumer::{Receiver, WireMessage};
use super::{BusError, Publisher, Result};
use crate::message::Message;

/// Mock publisher that records every accepted message.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<Message>>,
    fail_on_publish: RwLock<bool>,
    fail_ids: RwLock<HashSet<String>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Reject only the message with the given id.
    pub async fn fail_for(&self, id: impl Into<String>) {
        self.fail_ids.write().await.insert(id.into());
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published_ids(&self) -> Vec<String> {
        self.published
            .read()
            .await
            .iter()
            .map(|m| m.id().to_string())
            .collect()
    }

    pub async fn take_published(&self) -> Vec<Message> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, msg: &Message) -> Result<()> {
        if *self.fail_on_publish.read().await || self.fail_ids.read().await.contains(msg.id()) {
            return Err(BusError::Publish(format!("Mock publish failure for {}", msg.id())));
        }
        self.published.write().await.push(msg.clone());
        Ok(())
    }
}

/// Mock pull broker with one in-memory queue per name.
///
/// Received messages leave the queue; deleted receipts are recorded per queue.
#[derive(Default)]
pub struct MockReceiver {
    queues: RwLock<HashMap<String, VecDeque<WireMessage>>>,
    deleted: RwLock<HashMap<String, Vec<String>>>,
    fail_receive: RwLock<HashSet<String>>,
    fail_on_delete: RwLock<bool>,
    fail_on_queue: RwLock<bool>,
}

impl MockReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, queue: &str, msg: WireMessage) {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(msg);
    }

    /// Make every poll on `queue` fail.
    pub async fn fail_receive_on(&self, queue: &str) {
        self.fail_receive.write().await.insert(queue.to_string());
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn set_fail_on_queue(&self, fail: bool) {
        *self.fail_on_queue.write().await = fail;
    }

    /// Receipts deleted from `queue`, in order.
    pub async fn deleted(&self, queue: &str) -> Vec<String> {
        self.deleted
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Receiver for MockReceiver {
    async fn queue(&self, subscription: &str) -> Result<String> {
        if *self.fail_on_queue.read().await {
            return Err(BusError::Subscribe(format!("Mock queue lookup failure for {}", subscription)));
        }
        Ok(subscription.to_string())
    }

    async fn receive(&self, queue: &str, max_messages: i32, wait: Duration) -> Result<Vec<WireMessage>> {
        if self.fail_receive.read().await.contains(queue) {
            return Err(BusError::Receive("Mock receive failure".to_string()));
        }

        let batch: Vec<WireMessage> = {
            let mut queues = self.queues.write().await;
            let pending = queues.entry(queue.to_string()).or_default();
            let take = pending.len().min(max_messages.max(1) as usize);
            pending.drain(..take).collect()
        };

        if batch.is_empty() {
            // Stand-in for a long poll that found nothing.
            tokio::time::sleep(wait.min(Duration::from_millis(5)).max(Duration::from_millis(1))).await;
        }

        Ok(batch)
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        if *self.fail_on_delete.read().await {
            return Err(BusError::Ack("Mock delete failure".to_string()));
        }
        self.deleted
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push(receipt.to_string());
        Ok(())
    }
}
