use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classified failure of a save or load.
///
/// Every backend failure is mapped to one of these variants (see
/// [`crate::classify`]) before it reaches the caller or the status sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// No caller identity was supplied. No backend call was made.
    #[error("authentication required")]
    AuthRequired,

    /// Owner or resource id cannot be used to build a storage path.
    #[error("invalid document key: {0}")]
    InvalidKey(String),

    /// The live revision differs from the one the caller expected.
    #[error("conflict on {resource}: expected revision {expected}, live revision is {live:?}")]
    Conflict {
        resource: String,
        expected: u64,
        live: Option<u64>,
    },

    /// Another writer advanced the pointer first.
    #[error("stale write: revision {attempted} was already taken (live revision {live:?})")]
    StaleWrite { attempted: u64, live: Option<u64> },

    /// Network, availability, timeout or resource exhaustion failure.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Unknown(String),
}

/// Stable, machine-readable error code reported to sinks and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    Conflict,
    StaleWrite,
    Transient,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::StaleWrite => "STALE_WRITE",
            ErrorCode::Transient => "TRANSIENT",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::AuthRequired => ErrorCode::AuthRequired,
            SyncError::Conflict { .. } => ErrorCode::Conflict,
            SyncError::StaleWrite { .. } => ErrorCode::StaleWrite,
            SyncError::Transient(_) => ErrorCode::Transient,
            SyncError::InvalidKey(_) | SyncError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Only transient failures may be retried automatically. Conflicts need
    /// the caller to re-fetch and re-apply first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// `true` for both flavours of "changed elsewhere".
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. } | SyncError::StaleWrite { .. })
    }

    /// Revision currently held by the backend, when the error carries one.
    pub fn live_revision(&self) -> Option<u64> {
        match self {
            SyncError::Conflict { live, .. } | SyncError::StaleWrite { live, .. } => *live,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
