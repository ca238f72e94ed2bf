//! AWS SNS/SQS adapters.
//!
//! `SqsPublisher` sends outbox messages straight to a queue, `SnsPublisher`
//! publishes them to a topic, and `SqsReceiver` is the pull side used by
//! [`Subscriber`](super::Subscriber). Payloads travel as the message body;
//! metadata and the message id travel as string message attributes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info, warn};

use super::consumer::{Receiver, WireMessage};
use super::delivery::DeliveryOptions;
use super::{BusError, Publisher, PublisherConfig, Result};
use crate::message::{Message, Metadata};

/// Data type used for every message attribute.
const STRING_DATA_TYPE: &str = "String";

/// Attribute selector asking SQS for every message attribute.
const ALL_ATTRIBUTES: &str = "All";

/// Load AWS configuration, optionally overriding region and endpoint.
pub async fn load_sdk_config(region: Option<&str>, endpoint_url: Option<&str>) -> SdkConfig {
    let mut builder = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = region {
        builder = builder.region(aws_config::Region::new(region.to_string()));
    }

    if let Some(endpoint) = endpoint_url {
        builder = builder.endpoint_url(endpoint);
    }

    builder.load().await
}

/// Message bodies are strings, so payloads that are not UTF-8 are refused.
fn body(msg: &Message) -> Result<&str> {
    std::str::from_utf8(msg.payload()).map_err(|e| {
        BusError::Publish(format!("Payload of {} is not valid UTF-8: {}", msg.id(), e))
    })
}

// ============================================================================
// SQS publisher
// ============================================================================

/// Publishes outbox messages to one SQS queue.
pub struct SqsPublisher {
    client: SqsClient,
    queue_url: String,
    delivery: DeliveryOptions,
}

impl SqsPublisher {
    pub fn new(client: SqsClient, queue_url: impl Into<String>, delivery: DeliveryOptions) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            delivery,
        }
    }

    /// Build from configuration, loading AWS credentials from the environment.
    pub async fn connect(config: &PublisherConfig) -> Self {
        let sdk = load_sdk_config(config.region.as_deref(), config.endpoint_url.as_deref()).await;
        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            queue_url = %config.target,
            fifo = config.delivery.fifo,
            "Connected to AWS SQS"
        );
        Self::new(SqsClient::new(&sdk), &config.target, config.delivery.clone())
    }

    fn attributes(
        &self,
        msg: &Message,
    ) -> Result<HashMap<String, aws_sdk_sqs::types::MessageAttributeValue>> {
        use aws_sdk_sqs::types::MessageAttributeValue;

        self.delivery
            .attributes(msg)
            .into_iter()
            .map(|(key, value)| {
                let value = MessageAttributeValue::builder()
                    .data_type(STRING_DATA_TYPE)
                    .string_value(value)
                    .build()
                    .map_err(|e| BusError::Publish(format!("Failed to build attribute: {}", e)))?;
                Ok((key, value))
            })
            .collect()
    }
}

#[async_trait]
impl Publisher for SqsPublisher {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let body = body(msg)?;
        let attributes = self.attributes(msg)?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .set_message_attributes(Some(attributes))
            .set_message_deduplication_id(self.delivery.deduplication_id(msg).map(str::to_string))
            .set_message_group_id(self.delivery.ordering_key(msg).map(str::to_string))
            .send()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to send message to SQS: {}", e)))?;

        debug!(id = %msg.id(), queue_url = %self.queue_url, "Published message to SQS");
        Ok(())
    }
}

// ============================================================================
// SNS publisher
// ============================================================================

/// Publishes outbox messages to one SNS topic.
pub struct SnsPublisher {
    client: SnsClient,
    topic_arn: String,
    delivery: DeliveryOptions,
}

impl SnsPublisher {
    pub fn new(client: SnsClient, topic_arn: impl Into<String>, delivery: DeliveryOptions) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
            delivery,
        }
    }

    /// Build from configuration, loading AWS credentials from the environment.
    pub async fn connect(config: &PublisherConfig) -> Self {
        let sdk = load_sdk_config(config.region.as_deref(), config.endpoint_url.as_deref()).await;
        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            topic_arn = %config.target,
            fifo = config.delivery.fifo,
            "Connected to AWS SNS"
        );
        Self::new(SnsClient::new(&sdk), &config.target, config.delivery.clone())
    }

    fn attributes(
        &self,
        msg: &Message,
    ) -> Result<HashMap<String, aws_sdk_sns::types::MessageAttributeValue>> {
        use aws_sdk_sns::types::MessageAttributeValue;

        self.delivery
            .attributes(msg)
            .into_iter()
            .map(|(key, value)| {
                let value = MessageAttributeValue::builder()
                    .data_type(STRING_DATA_TYPE)
                    .string_value(value)
                    .build()
                    .map_err(|e| BusError::Publish(format!("Failed to build attribute: {}", e)))?;
                Ok((key, value))
            })
            .collect()
    }
}

#[async_trait]
impl Publisher for SnsPublisher {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let body = body(msg)?;
        let attributes = self.attributes(msg)?;

        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(body)
            .set_message_attributes(Some(attributes))
            .set_message_deduplication_id(self.delivery.deduplication_id(msg).map(str::to_string))
            .set_message_group_id(self.delivery.ordering_key(msg).map(str::to_string))
            .send()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish to SNS: {}", e)))?;

        debug!(id = %msg.id(), topic_arn = %self.topic_arn, "Published message to SNS");
        Ok(())
    }
}

// ============================================================================
// SQS receiver
// ============================================================================

/// Pull side of SQS for the consumer loop.
///
/// Subscription names may be queue names or ARNs; the last `:`-separated
/// segment is used as the queue name.
pub struct SqsReceiver {
    client: SqsClient,
}

impl SqsReceiver {
    pub fn new(client: SqsClient) -> Self {
        Self { client }
    }

    pub async fn connect(region: Option<&str>, endpoint_url: Option<&str>) -> Self {
        let sdk = load_sdk_config(region, endpoint_url).await;
        info!(region = ?region, endpoint = ?endpoint_url, "Connected to AWS SQS");
        Self::new(SqsClient::new(&sdk))
    }
}

/// Queue name for a subscription name or ARN.
pub fn queue_name(subscription: &str) -> &str {
    subscription.rsplit(':').next().unwrap_or(subscription)
}

#[async_trait]
impl Receiver for SqsReceiver {
    async fn queue(&self, subscription: &str) -> Result<String> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name(subscription))
            .send()
            .await
            .map_err(|e| {
                BusError::Subscribe(format!("Failed to get queue url for {}: {}", subscription, e))
            })?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| BusError::Subscribe(format!("No queue url returned for {}", subscription)))
    }

    async fn receive(&self, queue: &str, max_messages: i32, wait: Duration) -> Result<Vec<WireMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait.as_secs().min(i32::MAX as u64) as i32)
            .message_attribute_names(ALL_ATTRIBUTES)
            .send()
            .await
            .map_err(|e| BusError::Receive(format!("Failed to receive from SQS: {}", e)))?;

        let mut received = Vec::new();
        for message in output.messages() {
            let Some(receipt) = message.receipt_handle() else {
                warn!(queue_url = %queue, message_id = ?message.message_id(), "Skipping message without receipt handle");
                continue;
            };

            let attributes: Metadata = message
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.string_value().unwrap_or_default().to_string()))
                        .collect()
                })
                .unwrap_or_default();

            received.push(WireMessage {
                broker_id: message.message_id().map(str::to_string),
                receipt: receipt.to_string(),
                body: message.body().unwrap_or_default().as_bytes().to_vec(),
                attributes,
            });
        }

        Ok(received)
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(queue)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| BusError::Ack(format!("Failed to delete SQS message: {}", e)))?;
        Ok(())
    }
}
