//! Error sinks for recoverable failures.
//!
//! Long-running loops (the delivery worker and subscription consumers) keep
//! going after per-item failures. Those failures are handed to an injected
//! [`ErrorHandler`] so the embedding application decides where they end up.

use std::error::Error;

use tracing::error;

/// Receives errors that did not stop the loop that produced them.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, err: &(dyn Error + Send + Sync + 'static));
}

/// Reports errors through `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn handle_error(&self, err: &(dyn Error + Send + Sync + 'static)) {
        error!(error = %err, "Recoverable error");
    }
}

/// Discards every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {
    fn handle_error(&self, _err: &(dyn Error + Send + Sync + 'static)) {}
}

/// Collects error messages in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct CollectingErrorHandler {
    errors: std::sync::Mutex<Vec<String>>,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the collected error messages.
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn handle_error(&self, err: &(dyn Error + Send + Sync + 'static)) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[test]
    fn test_collecting_handler_records_in_order() {
        let handler = CollectingErrorHandler::new();
        handler.handle_error(&Boom(1));
        handler.handle_error(&Boom(2));
        assert_eq!(handler.errors(), vec!["boom 1", "boom 2"]);
    }

    #[test]
    fn test_noop_handler_accepts_errors() {
        NoopErrorHandler.handle_error(&Boom(3));
    }
}
