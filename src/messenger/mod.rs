//! Delivery worker relaying outbox messages to a broker.
//!
//! Each publish cycle fetches one batch of unpublished messages, publishes
//! them one by one and marks every success as published. A message that
//! fails stays pending and is retried on the next cycle; its failure is
//! collected into a [`BatchError`] without stopping the rest of the batch.
//!
//! Failing to fetch the batch, or failing to clean expired messages, is
//! fatal: `start` stops and returns the error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Publisher};
use crate::report::{ErrorHandler, TracingErrorHandler};
use crate::storage::{OutboxStore, StorageError};


/// Result type for delivery worker operations.
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Errors produced by the delivery worker.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("Fetching pending messages failed: {0}")]
    Fetch(#[source] StorageError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Cleaning published messages failed: {0}")]
    Clean(#[source] StorageError),
}

impl MessengerError {
    /// Fatal errors stop [`Messenger::start`]; batch errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MessengerError::Batch(_))
    }
}

/// Why one message of a batch was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("publishing: {0}")]
    Publish(#[source] BusError),

    #[error("marking as published: {0}")]
    MarkPublished(#[source] StorageError),
}

/// One undelivered message of a batch.
#[derive(Debug, thiserror::Error)]
#[error("message {message_id}: {cause}")]
pub struct PublishFailure {
    pub message_id: String,
    #[source]
    pub cause: FailureCause,
}

/// Per-message failures of one publish cycle.
#[derive(Debug)]
pub struct BatchError {
    failures: Vec<PublishFailure>,
}

impl BatchError {
    pub fn failures(&self) -> &[PublishFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<PublishFailure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Delivery worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Messages fetched per publish cycle. Default: 100.
    pub batch_size: usize,
    /// Milliseconds between publish cycles. Default: 1000.
    pub interval_ms: u64,
    /// Milliseconds between cleanup runs. Defaults to `interval_ms`.
    pub clean_interval_ms: Option<u64>,
    /// Age in seconds after which published messages are deleted.
    /// Cleanup is disabled when unset or zero.
    pub expiration_secs: Option<u64>,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_ms: 1000,
            clean_interval_ms: None,
            expiration_secs: None,
        }
    }
}

impl MessengerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn clean_interval(&self) -> Duration {
        self.clean_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or_else(|| self.interval())
    }

    pub fn expiration(&self) -> Option<Duration> {
        self.expiration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Relays messages from an [`OutboxStore`] to a [`Publisher`].
pub struct Messenger {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    config: MessengerConfig,
    errors: Arc<dyn ErrorHandler>,
}

impl Messenger {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn Publisher>,
        config: MessengerConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            errors: Arc::new(TracingErrorHandler),
        }
    }

    /// Replace the sink for recoverable batch errors raised inside `start`.
    pub fn with_error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = errors;
        self
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Run one publish cycle. Returns the number of delivered messages.
    pub async fn publish(&self) -> Result<usize> {
        let msgs = self
            .store
            .messages(self.config.batch_size)
            .await
            .map_err(MessengerError::Fetch)?;

        if msgs.is_empty() {
            return Ok(0);
        }

        let mut failures = Vec::new();
        let mut delivered = 0;

        for msg in &msgs {
            if let Err(e) = self.publisher.publish(msg).await {
                warn!(id = %msg.id(), error = %e, "Message publish failed");
                failures.push(PublishFailure {
                    message_id: msg.id().to_string(),
                    cause: FailureCause::Publish(e),
                });
                continue;
            }

            if let Err(e) = self.store.published(msg).await {
                warn!(id = %msg.id(), error = %e, "Marking message as published failed");
                failures.push(PublishFailure {
                    message_id: msg.id().to_string(),
                    cause: FailureCause::MarkPublished(e),
                });
                continue;
            }

            delivered += 1;
        }

        debug!(
            fetched = msgs.len(),
            delivered = delivered,
            failed = failures.len(),
            "Publish cycle finished"
        );

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(BatchError { failures }.into())
        }
    }

    /// Delete expired published messages. A no-op when expiration is disabled.
    pub async fn clean(&self) -> Result<u64> {
        let Some(expiration) = self.config.expiration() else {
            return Ok(0);
        };

        let deleted = self
            .store
            .delete_published_by_expiration(expiration)
            .await
            .map_err(MessengerError::Clean)?;

        if deleted > 0 {
            debug!(deleted = deleted, "Expired messages deleted");
        }
        Ok(deleted)
    }

    /// Publish on every interval tick, and clean on its own tick when
    /// expiration is configured, until `cancel` fires.
    ///
    /// Batch errors go to the error handler. Fetch and clean errors stop the
    /// loop and are returned. Cancellation returns `Ok(())`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut publish_tick = ticker(self.config.interval());
        let mut clean_tick = self
            .config
            .expiration()
            .map(|_| ticker(self.config.clean_interval()));

        info!(
            batch_size = self.config.batch_size,
            interval_ms = self.config.interval().as_millis() as u64,
            cleanup = clean_tick.is_some(),
            "Messenger started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Messenger stopped");
                    return Ok(());
                }
                _ = publish_tick.tick() => match self.publish().await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Messenger stopped on fatal error");
                        return Err(e);
                    }
                    Err(e) => self.errors.handle_error(&e),
                },
                _ = next_tick(&mut clean_tick) => {
                    if let Err(e) = self.clean().await {
                        error!(error = %e, "Messenger stopped on cleanup error");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Interval whose first tick fires one period from now.
fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
