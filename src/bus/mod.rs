//! Broker plumbing on both sides of the outbox.
//!
//! This module contains:
//! - `Publisher` trait: sends one outbox message to a broker
//! - `DeliveryOptions`: FIFO ordering key, deduplication id and wire attributes
//! - `Mux`: routes messages to one of several publishers by a metadata value
//! - `Subscriber`: per-subscription consumer loops over a `Receiver`
//! - Implementations: SNS/SQS, NATS, Mock

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::message::Message;

pub mod consumer;
pub mod delivery;
pub mod mock;
pub mod mux;
#[cfg(feature = "nats")]
pub mod nats;
#[cfg(feature = "sns-sqs")]
pub mod sns_sqs;
pub mod subscription;

pub use consumer::{decode, Receiver, Subscriber, SubscriberConfig, WireMessage};
pub use delivery::{DeliveryOptions, Envelope};
pub use mock::{MockPublisher, MockReceiver};
pub use mux::Mux;
#[cfg(feature = "nats")]
pub use nats::{NatsPublisher, NatsReceiver};
#[cfg(feature = "sns-sqs")]
pub use sns_sqs::{SnsPublisher, SqsPublisher, SqsReceiver};
pub use subscription::{MessageHandler, Subscription, Subscriptions};

/// Wire attribute carrying the message id when none is configured.
pub const MESSAGE_ID_KEY: &str = "message_id";

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Acknowledge failed: {0}")]
    Ack(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Subscription '{0}' is already registered")]
    DuplicateSubscription(String),

    #[error("Empty routing metadata key")]
    EmptyRouteKey,

    #[error("No matching broker for metadata '{key}' = {value:?}")]
    NoMatchingPublisher { key: String, value: Option<String> },
}

/// Sends one message to a remote broker.
///
/// Implementations:
/// - `SqsPublisher`: SQS queue
/// - `SnsPublisher`: SNS topic
/// - `NatsPublisher`: NATS subject
/// - `Mux`: routes to other publishers
/// - `MockPublisher`: In-memory mock for testing
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Transmit one message. Success means the broker accepted it.
    async fn publish(&self, msg: &Message) -> Result<()>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, msg: &Message) -> Result<()> {
        (**self).publish(msg).await
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Publisher type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherType {
    /// Send directly to an SQS queue.
    #[default]
    Sqs,
    /// Publish to an SNS topic.
    Sns,
    /// Publish on a NATS subject.
    Nats,
}

/// Publisher configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    #[serde(rename = "type")]
    pub publisher_type: PublisherType,
    /// Queue URL for SQS, topic ARN for SNS, default subject for NATS.
    pub target: String,
    /// AWS region. Uses the default provider chain if not set.
    pub region: Option<String>,
    /// Custom endpoint URL (for LocalStack or testing), NATS server URL.
    pub endpoint_url: Option<String>,
    /// NATS only: metadata field naming each message's subject.
    pub subject_key: Option<String>,
    pub delivery: DeliveryOptions,
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the broker publisher based on configuration.
///
/// SQS and SNS require the `sns-sqs` feature, NATS the `nats` feature.
pub async fn init_publisher(
    config: &PublisherConfig,
) -> std::result::Result<Arc<dyn Publisher>, Box<dyn std::error::Error + Send + Sync>> {
    if config.target.is_empty() {
        return Err(BusError::Config("publisher target is empty".to_string()).into());
    }

    match config.publisher_type {
        PublisherType::Sqs => {
            #[cfg(feature = "sns-sqs")]
            {
                let publisher = SqsPublisher::connect(config).await;
                info!(publisher_type = "sqs", target = %config.target, "Publisher initialized");
                Ok(Arc::new(publisher))
            }

            #[cfg(not(feature = "sns-sqs"))]
            {
                Err("SQS support requires the 'sns-sqs' feature. Rebuild with --features sns-sqs".into())
            }
        }
        PublisherType::Sns => {
            #[cfg(feature = "sns-sqs")]
            {
                let publisher = SnsPublisher::connect(config).await;
                info!(publisher_type = "sns", target = %config.target, "Publisher initialized");
                Ok(Arc::new(publisher))
            }

            #[cfg(not(feature = "sns-sqs"))]
            {
                Err("SNS support requires the 'sns-sqs' feature. Rebuild with --features sns-sqs".into())
            }
        }
        PublisherType::Nats => {
            #[cfg(feature = "nats")]
            {
                let publisher = NatsPublisher::connect(config).await?;
                info!(publisher_type = "nats", target = %config.target, "Publisher initialized");
                Ok(Arc::new(publisher))
            }

            #[cfg(not(feature = "nats"))]
            {
                Err("NATS support requires the 'nats' feature. Rebuild with --features nats".into())
            }
        }
    }
}
