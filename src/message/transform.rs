//! Conversion of producer values into outbox messages.
//!
//! Transformation is a pre-processing stage that runs before messages reach a
//! store. Producers either hand over ready [`Message`]s or plug in a
//! [`Transformer`] that turns domain values into messages, for example to
//! stamp correlation metadata on every outgoing message.

use serde::Serialize;

use super::{Message, Result};

/// Values that have a canonical message representation.
pub trait IntoMessage {
    fn into_message(self) -> Result<Message>;
}

impl IntoMessage for Message {
    fn into_message(self) -> Result<Message> {
        Ok(self)
    }
}

impl IntoMessage for String {
    fn into_message(self) -> Result<Message> {
        Message::new(self.into_bytes())
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> Result<Message> {
        Message::new(self.as_bytes())
    }
}

impl IntoMessage for Vec<u8> {
    fn into_message(self) -> Result<Message> {
        Message::new(self)
    }
}

impl IntoMessage for &[u8] {
    fn into_message(self) -> Result<Message> {
        Message::new(self)
    }
}

/// Wrapper marking a value to be encoded as a JSON payload.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoMessage for Json<T> {
    fn into_message(self) -> Result<Message> {
        let payload = serde_json::to_vec(&self.0)?;
        Message::new(payload)
    }
}

/// Converts an input value into a [`Message`].
pub trait Transformer<T>: Send + Sync {
    fn transform(&self, input: T) -> Result<Message>;
}

/// Transformer that applies the [`IntoMessage`] conversions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransformer;

impl<T: IntoMessage> Transformer<T> for DefaultTransformer {
    fn transform(&self, input: T) -> Result<Message> {
        input.into_message()
    }
}

/// Adapter allowing a plain closure to act as a [`Transformer`].
pub struct TransformerFn<F>(pub F);

impl<T, F> Transformer<T> for TransformerFn<F>
where
    F: Fn(T) -> Result<Message> + Send + Sync,
{
    fn transform(&self, input: T) -> Result<Message> {
        (self.0)(input)
    }
}

/// Run `transformer` over every input, failing on the first error.
pub fn transform_all<T, X, I>(transformer: &X, inputs: I) -> Result<Vec<Message>>
where
    X: Transformer<T> + ?Sized,
    I: IntoIterator<Item = T>,
{
    inputs
        .into_iter()
        .map(|input| transformer.transform(input))
        .collect()
}
