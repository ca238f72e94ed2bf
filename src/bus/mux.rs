//! Routes messages to one of several publishers by a metadata value.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, Publisher, Result};
use crate::message::Message;

/// Publisher that picks a downstream publisher from `metadata[key]`.
pub struct Mux {
    key: String,
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl Mux {
    /// Create a router keyed on one metadata field. The key must not be empty.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(BusError::EmptyRouteKey);
        }

        Ok(Self {
            key,
            publishers: HashMap::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Route messages whose metadata value equals `value` to `publisher`.
    ///
    /// Registering the same value twice replaces the earlier publisher.
    pub fn add_publisher(&mut self, value: impl Into<String>, publisher: Arc<dyn Publisher>) -> &mut Self {
        self.publishers.insert(value.into(), publisher);
        self
    }

    pub fn with_publisher(mut self, value: impl Into<String>, publisher: Arc<dyn Publisher>) -> Self {
        self.add_publisher(value, publisher);
        self
    }
}

#[async_trait]
impl Publisher for Mux {
    async fn publish(&self, msg: &Message) -> Result<()> {
        let value = msg.metadata().get(&self.key);
        let publisher = value.and_then(|v| self.publishers.get(v)).ok_or_else(|| {
            BusError::NoMatchingPublisher {
                key: self.key.clone(),
                value: value.cloned(),
            }
        })?;

        debug!(id = %msg.id(), key = %self.key, value = ?value, "Routing message");
        publisher.publish(msg).await
    }
}
