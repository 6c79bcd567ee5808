use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::model::DocumentKey;
use crate::pointer::PointerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictCheck {
    pub has_conflict: bool,
    /// Revision currently held by the backend, if the document exists.
    pub live_revision: Option<u64>,
}

/// Decides whether a caller's view of a document is out of date.
///
/// The engine treats `has_conflict = true` as final unless the caller asked
/// to force the write.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn detect_conflict(
        &self,
        key: &DocumentKey,
        expected_revision: u64,
    ) -> Result<ConflictCheck, SyncError>;
}

/// Compares the expected revision against a fresh pointer read.
pub struct PointerConflictResolver {
    pointers: Arc<dyn PointerStore>,
}

impl PointerConflictResolver {
    pub fn new(pointers: Arc<dyn PointerStore>) -> Self {
        Self { pointers }
    }
}

#[async_trait]
impl ConflictResolver for PointerConflictResolver {
    async fn detect_conflict(
        &self,
        key: &DocumentKey,
        expected_revision: u64,
    ) -> Result<ConflictCheck, SyncError> {
        let live_revision = self.pointers.get(key).await?.map(|r| r.revision);
        Ok(ConflictCheck {
            has_conflict: live_revision.unwrap_or(0) != expected_revision,
            live_revision,
        })
    }
}
