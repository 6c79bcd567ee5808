use common::storage::StorageError;
use engine::{ErrorCode, SyncError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{code}: {source}")]
    Sync {
        code: ErrorCode,
        #[source]
        source: SyncError,
    },
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        CliError::Sync {
            code: e.code(),
            source: e,
        }
    }
}

impl CliError {
    /// Process exit code. Sync failures get one code per classification so
    /// scripts can tell a conflict from a transient outage.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) | CliError::Storage(_) | CliError::Database(_) => 2,
            CliError::Payload(_) | CliError::Io(_) => 3,
            CliError::Sync { code, .. } => match code {
                ErrorCode::AuthRequired => 10,
                ErrorCode::Conflict => 11,
                ErrorCode::StaleWrite => 12,
                ErrorCode::Transient => 13,
                ErrorCode::Unknown => 14,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
