//! Transactional store of per-document pointer records.

mod database;
mod memory;

use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use crate::model::{DocumentKey, PointerRecord};

pub use database::DatabasePointerStore;
pub use memory::MemoryPointerStore;

#[derive(Debug, Error)]
pub enum PointerError {
    /// The stored revision already reached the guard's floor.
    #[error("pointer is at revision {current}, write of revision {attempted} would not advance it")]
    Stale { attempted: u64, current: u64 },

    #[error("corrupt pointer record: {0}")]
    Corrupt(String),

    #[error("pointer store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Condition attached to [`PointerStore::conditional_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGuard {
    /// The write aborts if the stored revision is at or above this value.
    pub floor: u64,
}

impl WriteGuard {
    /// Guard for a write that produces `revision`.
    pub fn advancing_to(revision: u64) -> Self {
        Self { floor: revision }
    }

    pub fn admits(&self, current: Option<u64>) -> bool {
        current.is_none_or(|current| current < self.floor)
    }

    /// The error for a write this guard refused.
    pub fn refused(&self, current: u64) -> PointerError {
        PointerError::Stale {
            attempted: self.floor,
            current,
        }
    }
}

#[async_trait]
pub trait PointerStore: Send + Sync {
    async fn get(&self, key: &DocumentKey) -> Result<Option<PointerRecord>, PointerError>;

    /// Atomically re-read the record for `record`'s key and replace it,
    /// failing with [`PointerError::Stale`] if `guard` does not admit the
    /// stored revision.
    async fn conditional_set(
        &self,
        record: PointerRecord,
        guard: WriteGuard,
    ) -> Result<(), PointerError>;

    /// All records for an owner, ordered by resource id.
    async fn list(&self, owner_id: &str) -> Result<Vec<PointerRecord>, PointerError>;
}
