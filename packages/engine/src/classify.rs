//! Maps raw backend failures onto [`SyncError`].
//!
//! Typed errors are classified by variant first. Anything that only carries
//! a message (remote backends, driver errors) falls back to keyword
//! heuristics. Unrecognised failures are `Unknown` and never retried.

use std::io::ErrorKind;
use std::time::Duration;

use common::storage::StorageError;
use sea_orm::DbErr;

use crate::codec::CodecError;
use crate::error::SyncError;
use crate::pointer::PointerError;

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "unavailable",
    "resource exhausted",
    "too many",
    "throttl",
    "slow down",
    "slowdown",
    "temporarily",
    "try again",
    "database is locked",
    "deadlock",
    "could not serialize",
];

const AUTH_MARKERS: &[&str] = &["unauthenticated", "unauthorized", "not signed in"];

/// Classify a failure known only by its message.
pub fn classify_message(message: &str) -> SyncError {
    let lower = message.to_ascii_lowercase();

    let needs_auth = AUTH_MARKERS.iter().any(|m| lower.contains(m))
        || mentioned_statuses(&lower).any(|status| status == 401);
    if needs_auth {
        return SyncError::AuthRequired;
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) || mentions_retryable_status(&lower) {
        return SyncError::Transient(message.to_string());
    }
    SyncError::Unknown(message.to_string())
}

/// Standalone three-digit numbers in a message.
fn mentioned_statuses(lower: &str) -> impl Iterator<Item = u16> + '_ {
    lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|digits| digits.len() == 3)
        .filter_map(|digits| digits.parse::<u16>().ok())
}

fn mentions_retryable_status(lower: &str) -> bool {
    mentioned_statuses(lower).any(is_retryable_status)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Classify an HTTP-style status returned by a remote backend.
pub fn classify_status(status: u16, message: &str) -> SyncError {
    match status {
        401 => SyncError::AuthRequired,
        s if is_retryable_status(s) => SyncError::Transient(format!("status {s}: {message}")),
        s => SyncError::Unknown(format!("status {s}: {message}")),
    }
}

pub fn classify_storage(err: &StorageError) -> SyncError {
    match err {
        // A pointer names a blob that is gone. Not self-healing.
        StorageError::NotFound(path) => SyncError::Unknown(format!("blob missing: {path}")),
        StorageError::Io(io) => match io.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::StorageFull
            | ErrorKind::ResourceBusy => SyncError::Transient(err.to_string()),
            _ => classify_message(&err.to_string()),
        },
        StorageError::InvalidPath(_) | StorageError::SizeLimitExceeded { .. } => {
            SyncError::Unknown(err.to_string())
        }
        // A fresh reference is resolved on the next attempt.
        StorageError::Expired(_) => SyncError::Transient(err.to_string()),
        StorageError::Backend {
            status: Some(status),
            message,
        } => classify_status(*status, message),
        StorageError::Backend {
            status: None,
            message,
        } => classify_message(message),
    }
}

pub fn classify_db(err: &DbErr) -> SyncError {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => SyncError::Transient(err.to_string()),
        _ => classify_message(&err.to_string()),
    }
}

pub fn classify_pointer(err: &PointerError) -> SyncError {
    match err {
        PointerError::Stale { attempted, current } => SyncError::StaleWrite {
            attempted: *attempted,
            live: Some(*current),
        },
        PointerError::Corrupt(_) => SyncError::Unknown(err.to_string()),
        PointerError::Unavailable(_) => SyncError::Transient(err.to_string()),
        PointerError::Database(db) => classify_db(db),
    }
}

pub fn classify_codec(err: &CodecError) -> SyncError {
    SyncError::Unknown(err.to_string())
}

/// A backend call that did not finish within the operation timeout.
pub fn timed_out(operation: &str, limit: Duration) -> SyncError {
    SyncError::Transient(format!(
        "{operation} timed out after {}ms",
        limit.as_millis()
    ))
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        classify_storage(&err)
    }
}

impl From<PointerError> for SyncError {
    fn from(err: PointerError) -> Self {
        classify_pointer(&err)
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        classify_codec(&err)
    }
}
