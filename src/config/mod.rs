//! Configuration for the relay process.

mod storage;

pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "outbox-relay.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "OUTBOX_RELAY_CONFIG";
/// Environment variable prefix for configuration overrides.
pub const CONFIG_ENV_PREFIX: &str = "OUTBOX_RELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "OUTBOX_RELAY_LOG";

use serde::Deserialize;

use crate::bus::{PublisherConfig, SubscriberConfig};
use crate::messenger::MessengerConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Outbox storage configuration.
    pub storage: StorageConfig,
    /// Delivery worker configuration.
    pub messenger: MessengerConfig,
    /// Consumer loop configuration.
    pub subscriber: SubscriberConfig,
    /// Broker publisher (optional).
    pub publisher: Option<PublisherConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `outbox-relay.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables such as `OUTBOX_RELAY__STORAGE__TYPE`
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}
