use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{PointerError, PointerStore, WriteGuard};
use crate::model::{DocumentKey, PointerRecord};

/// In-process pointer store. Conditional writes are atomic per key.
///
/// Clones share state, so two engines built over clones of one store behave
/// like two processes talking to the same backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryPointerStore {
    records: Arc<DashMap<DocumentKey, PointerRecord>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<PointerRecord>, PointerError> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn conditional_set(
        &self,
        record: PointerRecord,
        guard: WriteGuard,
    ) -> Result<(), PointerError> {
        let key = record
            .key()
            .map_err(|e| PointerError::Corrupt(e.to_string()))?;

        match self.records.entry(key) {
            Entry::Occupied(mut existing) => {
                let current = existing.get().revision;
                if !guard.admits(Some(current)) {
                    return Err(guard.refused(current));
                }
                existing.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<PointerRecord>, PointerError> {
        let mut records: Vec<PointerRecord> = self
            .records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(records)
    }
}
