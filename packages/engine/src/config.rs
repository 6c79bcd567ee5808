use std::time::Duration;

use common::RetryConfig;
use serde::Deserialize;

/// Engine behaviour settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Serve loads from the in-process cache. Default: true.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Cache entry lifetime in seconds. Default: 300.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound on every backend call in milliseconds. Default: 10000.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Lifetime of fetch references resolved during a load. Default: 60.
    #[serde(default = "default_fetch_ref_ttl_secs")]
    pub fetch_ref_ttl_secs: u64,
    /// Queue depth for status and telemetry notifications. Default: 256.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Backoff used by `save_with_retry`.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_operation_timeout_ms() -> u64 {
    10_000
}
fn default_fetch_ref_ttl_secs() -> u64 {
    60
}
fn default_notification_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: default_cache_enabled(),
            cache_ttl_secs: default_cache_ttl_secs(),
            operation_timeout_ms: default_operation_timeout_ms(),
            fetch_ref_ttl_secs: default_fetch_ref_ttl_secs(),
            notification_capacity: default_notification_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn fetch_ref_ttl(&self) -> Duration {
        Duration::from_secs(self.fetch_ref_ttl_secs)
    }
}

/// Pointer database connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Default: "sqlite://./data/docsync.db?mode=rwc".
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_database_url() -> String {
    "sqlite://./data/docsync.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            sqlx_logging: false,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            ..Self::default()
        }
    }
}
