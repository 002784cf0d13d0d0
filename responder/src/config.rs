use crate::errors::ResponderError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use telemetry::InfluxConfig;

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8314,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_cache_size")]
    pub size: usize,
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_cache_size() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            sync_interval_secs: default_sync_interval_secs(),
            size: default_cache_size(),
        }
    }
}

impl CacheConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

fn default_query_period() -> String {
    "1h".into()
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub application_name: String,
    /// JSON document with the rules and versions.
    pub response_config: PathBuf,
    /// Group-by period of the down-sampling queries. Also tells clients how
    /// often to check.
    #[serde(default = "default_query_period")]
    pub query_period: String,
    pub geodb: Option<PathBuf>,
    /// Telemetry is disabled when absent.
    pub influxdb: Option<InfluxConfig>,
    #[serde(default)]
    pub telemetry_cache: CacheConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ResponderError> {
        if self.listener.port == 0 {
            return Err(ResponderError::InvalidConfig(
                "listener.port must not be 0".into(),
            ));
        }
        if self.application_name.is_empty() {
            return Err(ResponderError::InvalidConfig(
                "application_name must not be empty".into(),
            ));
        }
        if self.telemetry_cache.size == 0 {
            return Err(ResponderError::InvalidConfig(
                "telemetry_cache.size must be at least 1".into(),
            ));
        }
        if self.telemetry_cache.sync_interval_secs == 0 {
            return Err(ResponderError::InvalidConfig(
                "telemetry_cache.sync_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
