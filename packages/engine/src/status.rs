use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::model::DocumentKey;

/// Lifecycle state of a document as seen by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum SyncStatus {
    Syncing,
    Synced { revision: u64 },
    Conflict,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictNotice {
    pub expected: u64,
    pub live: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Receives lifecycle notifications. Calls are delivered off the caller's
/// task and their outcome is never observed.
pub trait StatusSink: Send + Sync + 'static {
    fn set_status(&self, key: &DocumentKey, status: SyncStatus);
    fn set_conflict(&self, key: &DocumentKey, notice: &ConflictNotice);
    fn set_error(&self, key: &DocumentKey, notice: &ErrorNotice);
}

/// A queued status notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Status(DocumentKey, SyncStatus),
    Conflict(DocumentKey, ConflictNotice),
    Error(DocumentKey, ErrorNotice),
}

impl StatusEvent {
    pub fn deliver(self, sink: &dyn StatusSink) {
        match self {
            StatusEvent::Status(key, status) => sink.set_status(&key, status),
            StatusEvent::Conflict(key, notice) => {
                sink.set_status(&key, SyncStatus::Conflict);
                sink.set_conflict(&key, &notice);
            }
            StatusEvent::Error(key, notice) => {
                sink.set_status(&key, SyncStatus::Error);
                sink.set_error(&key, &notice);
            }
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn set_status(&self, key: &DocumentKey, status: SyncStatus) {
        info!(key = %key, status = ?status, "Sync status changed");
    }

    fn set_conflict(&self, key: &DocumentKey, notice: &ConflictNotice) {
        warn!(
            key = %key,
            expected = notice.expected,
            live = ?notice.live,
            "Document changed elsewhere"
        );
    }

    fn set_error(&self, key: &DocumentKey, notice: &ErrorNotice) {
        warn!(
            key = %key,
            code = %notice.code,
            retryable = notice.retryable,
            error = %notice.message,
            "Sync failed"
        );
    }
}

/// Keeps every notification in memory for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingStatusSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Status transitions for one key, in delivery order.
    pub fn statuses(&self, key: &DocumentKey) -> Vec<SyncStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Status(k, status) if &k == key => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorNotice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Error(_, notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn conflicts(&self) -> Vec<ConflictNotice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Conflict(_, notice) => Some(notice),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingStatusSink {
    fn set_status(&self, key: &DocumentKey, status: SyncStatus) {
        self.push(StatusEvent::Status(key.clone(), status));
    }

    fn set_conflict(&self, key: &DocumentKey, notice: &ConflictNotice) {
        self.push(StatusEvent::Conflict(key.clone(), notice.clone()));
    }

    fn set_error(&self, key: &DocumentKey, notice: &ErrorNotice) {
        self.push(StatusEvent::Error(key.clone(), notice.clone()));
    }
}
