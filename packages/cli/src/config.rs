use common::StorageConfig;
use config::{Config, ConfigError, Environment, File};
use engine::{DatabaseConfig, EngineConfig};
use serde::Deserialize;

/// Logging settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error. Default: "info".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// CLI application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Layer `config_path` (optional, any format the `config` crate reads)
    /// under `DOCSYNC__SECTION__KEY` environment variables.
    pub fn load(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("storage.backend", "filesystem")?
            .set_default("storage.root", "./data/blobs")?
            .set_default("database.url", "sqlite://./data/docsync.db?mode=rwc")?
            .set_default("log.level", "info")?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("DOCSYNC").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
