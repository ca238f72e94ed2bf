//! FIFO delivery attributes shared by every broker adapter.

use serde::Deserialize;

use super::MESSAGE_ID_KEY;
use crate::message::{Message, Metadata};

/// How a publisher derives ordering and deduplication for a message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryOptions {
    /// Target is a FIFO queue or topic.
    pub fifo: bool,
    /// Metadata field whose value becomes the ordering key.
    pub meta_ordering_key: Option<String>,
    /// Ordering key used when the metadata field is absent.
    pub default_ordering_key: Option<String>,
    /// Wire attribute that carries the message id.
    pub message_id_key: String,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            fifo: false,
            meta_ordering_key: None,
            default_ordering_key: None,
            message_id_key: MESSAGE_ID_KEY.to_string(),
        }
    }
}

/// What goes on the wire next to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub attributes: Metadata,
    pub ordering_key: Option<String>,
    pub deduplication_id: Option<String>,
}

impl DeliveryOptions {
    pub fn fifo() -> Self {
        Self {
            fifo: true,
            ..Self::default()
        }
    }

    pub fn with_meta_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.meta_ordering_key = Some(key.into());
        self
    }

    pub fn with_default_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.default_ordering_key = Some(key.into());
        self
    }

    pub fn with_message_id_key(mut self, key: impl Into<String>) -> Self {
        self.message_id_key = key.into();
        self
    }

    /// Attribute name for the message id; empty configuration means the default.
    pub fn message_id_key(&self) -> &str {
        if self.message_id_key.is_empty() {
            MESSAGE_ID_KEY
        } else {
            &self.message_id_key
        }
    }

    /// Ordering (message group) key for FIFO targets.
    ///
    /// A present metadata value wins over the default key. Never set for
    /// non-FIFO targets.
    pub fn ordering_key<'a>(&'a self, msg: &'a Message) -> Option<&'a str> {
        if !self.fifo {
            return None;
        }

        self.meta_ordering_key
            .as_deref()
            .and_then(|key| msg.metadata().get(key))
            .map(String::as_str)
            .or_else(|| {
                self.default_ordering_key
                    .as_deref()
                    .filter(|key| !key.is_empty())
            })
    }

    /// Deduplication id for FIFO targets: the message id.
    pub fn deduplication_id<'a>(&self, msg: &'a Message) -> Option<&'a str> {
        self.fifo.then(|| msg.id())
    }

    /// Metadata plus the message id under the reserved key.
    ///
    /// The reserved key overrides a metadata entry with the same name.
    pub fn attributes(&self, msg: &Message) -> Metadata {
        let mut attributes = msg.metadata().clone();
        attributes.insert(self.message_id_key().to_string(), msg.id().to_string());
        attributes
    }

    pub fn envelope(&self, msg: &Message) -> Envelope {
        Envelope {
            attributes: self.attributes(msg),
            ordering_key: self.ordering_key(msg).map(str::to_string),
            deduplication_id: self.deduplication_id(msg).map(str::to_string),
        }
    }
}
