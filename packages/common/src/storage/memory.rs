use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BlobHead, BlobMeta, BlobStore, FetchRef, PutReceipt, validate_path};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Arc<[u8]>,
    hash: ContentHash,
    meta: BlobMeta,
}

/// In-process blob store.
///
/// Cloning shares the underlying map, so several engines in one test can
/// point at the same "bucket".
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        data: &[u8],
        meta: BlobMeta,
    ) -> Result<PutReceipt, StorageError> {
        validate_path(path)?;
        let started = Instant::now();
        let hash = ContentHash::compute(data);

        let blob = StoredBlob {
            data: Arc::from(data),
            hash,
            meta,
        };
        let written = match self.blobs.entry(path.to_string()) {
            Entry::Occupied(existing) if existing.get().hash == hash => false,
            Entry::Occupied(mut existing) => {
                existing.insert(blob);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(blob);
                true
            }
        };

        Ok(PutReceipt {
            size: data.len() as u64,
            content_hash: hash,
            elapsed: started.elapsed(),
            written,
        })
    }

    async fn head(&self, path: &str) -> Result<Option<BlobHead>, StorageError> {
        validate_path(path)?;
        Ok(self.blobs.get(path).map(|blob| BlobHead {
            size: blob.data.len() as u64,
            content_hash: blob.hash,
            meta: blob.meta.clone(),
        }))
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        validate_path(path)?;
        Ok(self.blobs.remove(path).is_some())
    }

    async fn resolve_fetch_ref(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<FetchRef, StorageError> {
        validate_path(path)?;
        Ok(FetchRef::new(path, format!("mem://{path}"), ttl))
    }

    async fn fetch(&self, fetch_ref: &FetchRef) -> Result<Vec<u8>, StorageError> {
        fetch_ref.ensure_fresh()?;
        self.blobs
            .get(&fetch_ref.path)
            .map(|blob| blob.data.to_vec())
            .ok_or_else(|| StorageError::NotFound(fetch_ref.path.clone()))
    }
}
