use serde::{Serialize, Deserialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::Result;

/// Runtime configuration for the registry and the `groupsd` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Groups handed to a member materialized by `load_member(.., true)`,
    /// in this order.
    pub default_groups: Vec<String>,
    pub tick_interval_ms: u64,
    /// Upper bound the binary waits for unload flushes on shutdown.
    pub shutdown_flush_timeout_ms: u64,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_groups: vec!["Member".to_string()],
            tick_interval_ms: 50,
            shutdown_flush_timeout_ms: 5_000,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "groupsd.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Load a TOML file and apply `GROUPS_*` environment overrides on top,
    /// e.g. `GROUPS_TICK_INTERVAL_MS=100` or `GROUPS_LOGGING__LEVEL=debug`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("GROUPS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_timeout_ms)
    }
}
