//! Bootstrap utilities for the relay binary.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the `OUTBOX_RELAY_LOG` environment variable.
///
/// Defaults to "info" level if the variable is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

const MAX_RETRIES: u32 = 30;
const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Run `connect` until it succeeds, backing off exponentially between attempts.
///
/// Returns the last error after `max_retries` failed attempts.
pub async fn connect_with_retry<T, E, F, Fut>(
    name: &str,
    max_retries: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_retries = max_retries.max(1);
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                info!(target_name = %name, attempt = attempt, "Connected");
                return Ok(client);
            }
            Err(e) if attempt < max_retries => {
                warn!(
                    target_name = %name,
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                error!(target_name = %name, attempts = attempt, error = %e, "Connection failed");
                return Err(e);
            }
        }
    }
}

/// Retry budget used by the relay binary.
pub fn default_max_retries() -> u32 {
    MAX_RETRIES
}

/// Cancel `cancel` once `signal` fires.
///
/// A signal listener that fails to register leaves the token alone, so the
/// relay keeps running and must be stopped another way.
pub async fn shutdown_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested");
    cancel.cancel();
}
