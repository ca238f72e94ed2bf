//! Named subscriptions and their registry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{BusError, Result};
use crate::message::Message;

/// Handler for messages received on a subscription.
pub trait MessageHandler: Send + Sync {
    /// Process one message. An error leaves the wire message unacknowledged.
    fn handle(&self, msg: Message) -> BoxFuture<'static, std::result::Result<(), BusError>>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), BusError>> + Send + 'static,
{
    fn handle(&self, msg: Message) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        Box::pin(self(msg))
    }
}

/// A queue name paired with the handler for its messages.
#[derive(Clone)]
pub struct Subscription {
    name: String,
    handler: Arc<dyn MessageHandler>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, handler: impl MessageHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    pub fn handle(&self, msg: Message) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        self.handler.handle(msg)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registered subscriptions, unique by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register subscriptions.
    ///
    /// Fails with [`BusError::DuplicateSubscription`] if any name is already
    /// registered or repeated within `subs`; nothing is added in that case.
    pub fn add(&mut self, subs: impl IntoIterator<Item = Subscription>) -> Result<()> {
        let subs: Vec<Subscription> = subs.into_iter().collect();

        for (i, sub) in subs.iter().enumerate() {
            let repeated = subs[..i].iter().any(|s| s.name == sub.name);
            if repeated || self.get(&sub.name).is_some() {
                return Err(BusError::DuplicateSubscription(sub.name.clone()));
            }
        }

        self.entries.extend(subs);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn accept(_msg: Message) -> Result<()> {
        Ok(())
    }

    fn noop(name: &str) -> Subscription {
        Subscription::new(name, accept)
    }

    #[test]
    fn test_add_keeps_registration_order() {
        let mut subs = Subscriptions::new();
        subs.add([noop("orders"), noop("payments")]).unwrap();

        let names: Vec<&str> = subs.iter().map(Subscription::name).collect();
        assert_eq!(names, vec!["orders", "payments"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut subs = Subscriptions::new();
        subs.add([noop("orders")]).unwrap();

        let err = subs.add([noop("orders")]).unwrap_err();

        assert!(matches!(err, BusError::DuplicateSubscription(ref name) if name == "orders"));
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_duplicate_within_one_call_adds_nothing() {
        let mut subs = Subscriptions::new();

        let result = subs.add([noop("a"), noop("b"), noop("a")]);

        assert!(result.is_err());
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn test_closure_handler_receives_message() {
        let sub = Subscription::new("echo", |msg: Message| async move {
            if msg.payload() == b"fail" {
                Err(BusError::Handler("rejected".to_string()))
            } else {
                Ok(())
            }
        });

        assert!(sub.handle(Message::new("ok").unwrap()).await.is_ok());
        assert!(sub.handle(Message::new("fail").unwrap()).await.is_err());
    }
}
