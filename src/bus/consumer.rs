//! Consumer side: long-poll loops feeding subscription handlers.
//!
//! One loop runs per registered subscription. A wire message is deleted only
//! after its handler succeeds; otherwise it stays on the broker and is
//! redelivered once its visibility timeout expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::subscription::{Subscription, Subscriptions};
use super::{BusError, Result, MESSAGE_ID_KEY};
use crate::message::{Message, Metadata};
use crate::report::{ErrorHandler, TracingErrorHandler};

/// A message as received from a pull-style broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    /// Broker-assigned message id, if the broker exposes one.
    pub broker_id: Option<String>,
    /// Handle used to delete the message after handling.
    pub receipt: String,
    pub body: Vec<u8>,
    pub attributes: Metadata,
}

/// Narrow receive capability of a pull-style broker.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Resolve the queue handle for a subscription name.
    async fn queue(&self, subscription: &str) -> Result<String>;

    /// Long-poll for up to `max_messages`, waiting at most `wait`.
    async fn receive(&self, queue: &str, max_messages: i32, wait: Duration) -> Result<Vec<WireMessage>>;

    /// Delete (acknowledge) one message by its receipt.
    async fn delete(&self, queue: &str, receipt: &str) -> Result<()>;
}

/// Consumer loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Messages fetched per poll (default: 1).
    pub max_messages: i32,
    /// Long-poll wait in seconds (default: 20).
    pub wait_time_secs: u64,
    /// Wire attribute holding the outbox message id.
    pub message_id_key: String,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time_secs: 20,
            message_id_key: MESSAGE_ID_KEY.to_string(),
        }
    }
}

impl SubscriberConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}

/// Convert a wire message into a [`Message`].
///
/// The id comes from the `message_id_key` attribute, falling back to the
/// broker's own id. The reserved attribute is not copied into metadata.
pub fn decode(wire: &WireMessage, message_id_key: &str) -> Message {
    let mut metadata = wire.attributes.clone();
    let id = metadata
        .remove(message_id_key)
        .filter(|id| !id.is_empty())
        .or_else(|| wire.broker_id.clone())
        .unwrap_or_default();

    Message::from_parts(id, metadata, wire.body.clone(), Utc::now(), false)
}

/// Runs one consumer loop per registered subscription.
pub struct Subscriber {
    receiver: Arc<dyn Receiver>,
    config: SubscriberConfig,
    subscriptions: Subscriptions,
    errors: Arc<dyn ErrorHandler>,
}

impl Subscriber {
    pub fn new(receiver: Arc<dyn Receiver>, config: SubscriberConfig) -> Self {
        Self {
            receiver,
            config,
            subscriptions: Subscriptions::new(),
            errors: Arc::new(TracingErrorHandler),
        }
    }

    /// Replace the sink for handler and delete failures.
    pub fn with_error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = errors;
        self
    }

    /// Register subscriptions. Duplicate names are rejected.
    pub fn register(&mut self, subs: impl IntoIterator<Item = Subscription>) -> Result<()> {
        self.subscriptions.add(subs)
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Consume every subscription until `cancel` fires or a loop fails.
    ///
    /// Queue handles are resolved before any loop starts. A poll failure in
    /// one loop cancels the others and is returned once they have stopped.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let mut queues = Vec::with_capacity(self.subscriptions.len());
        for sub in self.subscriptions.iter() {
            let queue = self.receiver.queue(sub.name()).await?;
            queues.push((sub.clone(), queue));
        }

        let cancel = cancel.child_token();
        let mut loops = JoinSet::new();

        for (sub, queue) in queues {
            let consumer = Consumer {
                receiver: Arc::clone(&self.receiver),
                config: self.config.clone(),
                errors: Arc::clone(&self.errors),
                subscription: sub,
                queue,
            };
            loops.spawn(consumer.run(cancel.clone()));
        }

        let mut failure = None;
        while let Some(joined) = loops.join_next().await {
            let result = joined
                .map_err(|e| BusError::Receive(format!("consumer task failed: {}", e)))
                .and_then(|r| r);

            if let Err(e) = result {
                if failure.is_none() {
                    cancel.cancel();
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct Consumer {
    receiver: Arc<dyn Receiver>,
    config: SubscriberConfig,
    errors: Arc<dyn ErrorHandler>,
    subscription: Subscription,
    queue: String,
}

impl Consumer {
    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let name = self.subscription.name().to_string();
        info!(subscription = %name, queue = %self.queue, "Starting consumer");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.receiver.receive(&self.queue, self.config.max_messages, self.config.wait_time()) => received,
            };

            let batch = received.map_err(|e| {
                error!(subscription = %name, error = %e, "Polling failed");
                BusError::Receive(format!("{}: {}", name, e))
            })?;

            for wire in batch {
                if cancel.is_cancelled() {
                    break;
                }
                self.process(wire).await;
            }
        }

        info!(subscription = %name, "Consumer stopped");
        Ok(())
    }

    async fn process(&self, wire: WireMessage) {
        let msg = decode(&wire, &self.config.message_id_key);
        let id = msg.id().to_string();

        if let Err(e) = self.subscription.handle(msg).await {
            self.errors.handle_error(&e);
            return;
        }

        match self.receiver.delete(&self.queue, &wire.receipt).await {
            Ok(()) => debug!(subscription = %self.subscription.name(), id = %id, "Message handled"),
            Err(e) => self.errors.handle_error(&e),
        }
    }
}
