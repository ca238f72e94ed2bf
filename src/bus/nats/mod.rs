//! NATS adapters.
//!
//! `NatsPublisher` publishes outbox messages on a subject taken from message
//! metadata or from configuration. Metadata and the message id travel as
//! headers, and the `Nats-Msg-Id` header lets a JetStream stream on that
//! subject deduplicate redeliveries.
//!
//! `NatsReceiver` is the pull side used by [`Subscriber`](super::Subscriber):
//! each subscription name is the subject it listens on. Messages delivered
//! through a JetStream push consumer are acknowledged on delete; core NATS
//! messages carry nothing to acknowledge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::consumer::{Receiver, WireMessage};
use super::delivery::DeliveryOptions;
use super::{BusError, Publisher, PublisherConfig, Result};
use crate::message::{Message, Metadata};

/// Server used when no endpoint is configured.
pub const DEFAULT_URL: &str = "nats://localhost:4222";

/// Header JetStream deduplicates on.
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Reply prefix of JetStream deliveries.
const ACK_PREFIX: &str = "$JS.ACK.";

const ACK_PAYLOAD: &[u8] = b"+ACK";

/// Connect to a NATS server.
pub async fn connect(url: &str) -> Result<Client> {
    async_nats::connect(url)
        .await
        .map_err(|e| BusError::Connection(format!("Failed to connect to NATS at {}: {}", url, e)))
}

/// Message headers: metadata, the id under the reserved attribute and `Nats-Msg-Id`.
fn headers(delivery: &DeliveryOptions, msg: &Message) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in delivery.attributes(msg) {
        headers.insert(key.as_str(), value.as_str());
    }
    headers.insert(MSG_ID_HEADER, msg.id());
    headers
}

/// Split received headers into the broker id and the remaining attributes.
fn attributes(headers: &HeaderMap) -> (Option<String>, Metadata) {
    let mut broker_id = None;
    let mut attributes = Metadata::new();

    for (name, values) in headers.iter() {
        let Some(value) = values.first() else {
            continue;
        };
        let name = name.to_string();
        if name == MSG_ID_HEADER {
            broker_id = Some(value.to_string());
        } else {
            attributes.insert(name, value.to_string());
        }
    }

    (broker_id, attributes)
}

fn wire_message(msg: async_nats::Message) -> WireMessage {
    let (broker_id, attributes) = match &msg.headers {
        Some(headers) => attributes(headers),
        None => (None, Metadata::new()),
    };

    WireMessage {
        broker_id,
        receipt: msg.reply.map(|reply| reply.to_string()).unwrap_or_default(),
        body: msg.payload.to_vec(),
        attributes,
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Publishes outbox messages to NATS subjects.
pub struct NatsPublisher {
    client: Client,
    subject: String,
    subject_key: Option<String>,
    delivery: DeliveryOptions,
}

impl NatsPublisher {
    /// Publish every message on `subject`.
    pub fn new(client: Client, subject: impl Into<String>, delivery: DeliveryOptions) -> Self {
        Self {
            client,
            subject: subject.into(),
            subject_key: None,
            delivery,
        }
    }

    /// Take the subject from this metadata field when a message carries it.
    pub fn with_subject_key(mut self, key: impl Into<String>) -> Self {
        self.subject_key = Some(key.into()).filter(|key: &String| !key.is_empty());
        self
    }

    /// Build from configuration: `endpoint_url` is the server and `target`
    /// the fallback subject.
    pub async fn connect(config: &PublisherConfig) -> Result<Self> {
        let url = config.endpoint_url.as_deref().unwrap_or(DEFAULT_URL);
        let client = connect(url).await?;
        info!(
            url = %url,
            subject = %config.target,
            subject_key = ?config.subject_key,
            "Connected to NATS"
        );

        let publisher = Self::new(client, &config.target, config.delivery.clone());
        Ok(match &config.subject_key {
            Some(key) => publisher.with_subject_key(key),
            None => publisher,
        })
    }

    fn subject<'a>(&'a self, msg: &'a Message) -> Result<&'a str> {
        self.subject_key
            .as_deref()
            .and_then(|key| msg.metadata().get(key))
            .map(String::as_str)
            .filter(|subject| !subject.is_empty())
            .or_else(|| Some(self.subject.as_str()).filter(|subject| !subject.is_empty()))
            .ok_or_else(|| BusError::Publish(format!("No NATS subject for message {}", msg.id())))
    }
}

#[async_trait]
impl Publisher for NatsPublisher {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let subject = self.subject(msg)?.to_string();
        let headers = headers(&self.delivery, msg);

        self.client
            .publish_with_headers(subject.clone(), headers, msg.payload().to_vec().into())
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish to NATS: {}", e)))?;
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to flush NATS connection: {}", e)))?;

        debug!(id = %msg.id(), subject = %subject, "Published message to NATS");
        Ok(())
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Receives NATS messages for subscriptions named after their subjects.
pub struct NatsReceiver {
    client: Client,
    subscriptions: RwLock<HashMap<String, Arc<Mutex<async_nats::Subscriber>>>>,
}

impl NatsReceiver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    async fn subscription(&self, subject: &str) -> Result<Arc<Mutex<async_nats::Subscriber>>> {
        self.subscriptions
            .read()
            .await
            .get(subject)
            .cloned()
            .ok_or_else(|| BusError::Receive(format!("Not subscribed to {}", subject)))
    }
}

#[async_trait]
impl Receiver for NatsReceiver {
    /// Subscribe to the subject once; later calls reuse the subscription.
    async fn queue(&self, subscription: &str) -> Result<String> {
        let mut subscriptions = self.subscriptions.write().await;
        if !subscriptions.contains_key(subscription) {
            let subscriber = self
                .client
                .subscribe(subscription.to_string())
                .await
                .map_err(|e| BusError::Subscribe(format!("{}: {}", subscription, e)))?;
            subscriptions.insert(subscription.to_string(), Arc::new(Mutex::new(subscriber)));
            debug!(subject = %subscription, "Subscribed to NATS subject");
        }

        Ok(subscription.to_string())
    }

    /// Wait up to `wait` for the first message, then take whatever else is
    /// already buffered up to `max_messages`.
    async fn receive(&self, queue: &str, max_messages: i32, wait: Duration) -> Result<Vec<WireMessage>> {
        let subscription = self.subscription(queue).await?;
        let mut subscriber = subscription.lock().await;
        let max = max_messages.max(1) as usize;

        let first = match tokio::time::timeout(wait, subscriber.next()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(None) => return Err(BusError::Receive(format!("Subscription to {} closed", queue))),
            Ok(Some(msg)) => msg,
        };

        let mut batch = vec![wire_message(first)];
        while batch.len() < max {
            match subscriber.next().now_or_never() {
                Some(Some(msg)) => batch.push(wire_message(msg)),
                _ => break,
            }
        }

        Ok(batch)
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        if !receipt.starts_with(ACK_PREFIX) {
            return Ok(());
        }

        self.client
            .publish(receipt.to_string(), ACK_PAYLOAD.to_vec().into())
            .await
            .map_err(|e| BusError::Ack(format!("{}: {}", queue, e)))
    }
}
