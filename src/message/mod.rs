//! Outbox message value object.
//!
//! A [`Message`] is created once by producer code, written to the outbox in the
//! same transaction as the business state change, and later relayed to a broker
//! by the [`Messenger`](crate::messenger::Messenger). Its identity never changes
//! after creation; metadata may be adjusted before the message is first stored.

pub mod transform;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};
use uuid::Uuid;

pub use transform::{transform_all, DefaultTransformer, IntoMessage, Json, Transformer, TransformerFn};

/// Application headers carried alongside a message payload.
pub type Metadata = HashMap<String, String>;

/// Result type for message construction.
pub type Result<T> = std::result::Result<T, MessageError>;

/// Errors raised while building a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("empty message payload")]
    EmptyPayload,

    #[error("encoding payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message to be delivered to a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
    metadata: Metadata,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    published: bool,
}

impl Message {
    /// Create a new unpublished message with a fresh identity.
    ///
    /// Fails with [`MessageError::EmptyPayload`] if `payload` is empty.
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(MessageError::EmptyPayload);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            payload,
            created_at: Utc::now(),
            published: false,
        })
    }

    /// Rebuild a message from persisted or received parts.
    ///
    /// No validation is applied: rows read back from storage and messages
    /// received from a broker are taken as they are.
    pub fn from_parts(
        id: impl Into<String>,
        metadata: Metadata,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        published: bool,
    ) -> Self {
        Self {
            id: id.into(),
            metadata,
            payload,
            created_at,
            published,
        }
    }

    /// Set a metadata entry, replacing any previous value for `key`.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder form of [`set_metadata`](Self::set_metadata).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn published(&self) -> bool {
        self.published
    }
}

/// JSON view used by inspection tooling.
///
/// The payload is embedded as raw JSON when it parses, and as a string otherwise.
impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct View<'a> {
            id: &'a str,
            metadata: &'a Metadata,
            payload: serde_json::Value,
            published: bool,
            at: DateTime<Utc>,
        }

        let payload = serde_json::from_slice(&self.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.payload).into_owned())
        });

        View {
            id: &self.id,
            metadata: &self.metadata,
            payload,
            published: self.published,
            at: self.created_at,
        }
        .serialize(serializer)
    }
}
