//! outbox-relay - Transactional Outbox
//!
//! Durable outbox storage written inside the caller's transaction, a
//! delivery worker relaying stored messages to a broker at least once, and
//! consumer loops feeding broker messages to subscription handlers.

pub mod bus;
pub mod config;
pub mod message;
pub mod messenger;
pub mod report;
pub mod storage;
pub mod utils;

pub use bus::{BusError, Mux, Publisher, Subscriber, Subscription};
pub use message::{Message, MessageError, Metadata};
pub use messenger::{Messenger, MessengerError};
pub use report::ErrorHandler;
pub use storage::{OutboxStore, StorageError};
