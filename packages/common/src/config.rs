use serde::Deserialize;

/// Which blob store backs the engine.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Filesystem,
    Memory,
    S3,
}

/// S3-compatible bucket settings. Only read when `storage.backend = "s3"`.
#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,
    /// AWS region name, or the signing region of a custom endpoint.
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// Custom endpoint (MinIO, R2, ...). Unset means AWS.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix under which all blobs are written.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

fn default_s3_region() -> String {
    "us-east-1".into()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_s3_region(),
            endpoint: None,
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Default: filesystem.
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Root directory for the filesystem backend. Default: "./data/blobs".
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Largest payload accepted by `put`. Default: 16 MiB.
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: u64,
    #[serde(default)]
    pub s3: S3Config,
}

fn default_storage_root() -> String {
    "./data/blobs".into()
}
fn default_max_blob_bytes() -> u64 {
    16 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            root: default_storage_root(),
            max_blob_bytes: default_max_blob_bytes(),
            s3: S3Config::default(),
        }
    }
}

/// Backoff settings for retrying transient failures.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    /// Delay before the second attempt. Default: 200ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay. Default: 5000ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
