//! Shared storage integration tests.
//!
//! Tests the OutboxStore and InspectStore interfaces against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod outbox_store_tests;
