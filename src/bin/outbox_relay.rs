//! outbox-relay: Outbox delivery process
//!
//! Polls the outbox table and publishes pending messages to the configured
//! broker until interrupted.
//!
//! ## Architecture
//! ```text
//! [Application] --tx--> [Outbox table] -> [outbox-relay] -> [SQS queue / SNS topic / NATS subject]
//! ```
//!
//! ## Configuration
//! - First argument: optional YAML configuration file
//! - OUTBOX_RELAY_CONFIG: YAML configuration file
//! - OUTBOX_RELAY__<SECTION>__<KEY>: overrides, e.g. OUTBOX_RELAY__STORAGE__TYPE=postgres
//! - OUTBOX_RELAY_LOG: log filter (default: info)

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use outbox_relay::bus::init_publisher;
use outbox_relay::config::Config;
use outbox_relay::messenger::Messenger;
use outbox_relay::storage::init_storage;
use outbox_relay::utils::bootstrap::{
    connect_with_retry, default_max_retries, init_tracing, shutdown_on_signal,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e.to_string()
    })?;

    info!("Starting outbox-relay");

    let publisher_config = config
        .publisher
        .as_ref()
        .ok_or("outbox-relay requires 'publisher' configuration")?;

    let store = connect_with_retry("outbox storage", default_max_retries(), || {
        init_storage(&config.storage)
    })
    .await?;
    let publisher = init_publisher(publisher_config).await?;

    let messenger = Messenger::new(store, publisher, config.messenger.clone());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(tokio::signal::ctrl_c(), cancel.clone()));

    info!("outbox-relay running, press Ctrl+C to exit");

    messenger.start(cancel).await?;

    Ok(())
}
