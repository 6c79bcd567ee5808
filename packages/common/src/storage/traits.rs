use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageError;
use super::hash::ContentHash;

/// Suffix reserved for metadata sidecars written next to each blob.
pub const META_SUFFIX: &str = ".meta.json";

/// Caller-supplied tags stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Revision of the document this blob belongs to.
    pub revision: u64,
    pub written_at: DateTime<Utc>,
    pub content_type: String,
}

impl BlobMeta {
    pub fn new(revision: u64, content_type: impl Into<String>) -> Self {
        Self {
            revision,
            written_at: Utc::now(),
            content_type: content_type.into(),
        }
    }
}

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHead {
    pub size: u64,
    pub content_hash: ContentHash,
    pub meta: BlobMeta,
}

/// Outcome of a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub size: u64,
    pub content_hash: ContentHash,
    pub elapsed: Duration,
    /// `false` when identical bytes were already stored at the path.
    pub written: bool,
}

/// Time-bounded reference to a blob's content.
///
/// References are resolved per read and must not be stored: a reference
/// handed out for one load may be unusable by the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRef {
    pub path: String,
    /// Backend-specific location (file URL, presigned URL, ...).
    pub location: String,
    pub expires_at: DateTime<Utc>,
}

impl FetchRef {
    pub fn new(path: impl Into<String>, location: impl Into<String>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            location: location.into(),
            expires_at: expiry_after(ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Fail with [`StorageError::Expired`] once the reference is past its expiry.
    pub fn ensure_fresh(&self) -> Result<(), StorageError> {
        if self.is_expired() {
            return Err(StorageError::Expired(self.path.clone()));
        }
        Ok(())
    }
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Reject paths that are empty, absolute, contain empty or dot segments, or
/// collide with metadata sidecars.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath("path is empty".into()));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(StorageError::InvalidPath(format!(
            "path must be relative with '/' separators: {path}"
        )));
    }
    if path.ends_with(META_SUFFIX) {
        return Err(StorageError::InvalidPath(format!(
            "path uses reserved suffix {META_SUFFIX}: {path}"
        )));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidPath(format!(
                "path contains an empty or relative segment: {path}"
            )));
        }
    }
    Ok(())
}

/// Path-addressed blob storage.
///
/// Writes are idempotent: putting the same bytes at the same path twice is
/// indistinguishable from putting them once. Overwriting a path with
/// different bytes is allowed.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path` tagged with `meta`.
    async fn put(
        &self,
        path: &str,
        data: &[u8],
        meta: BlobMeta,
    ) -> Result<PutReceipt, StorageError>;

    /// Probe size and metadata. Returns `None` if nothing is stored at `path`.
    async fn head(&self, path: &str) -> Result<Option<BlobHead>, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.head(path).await?.is_some())
    }

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Resolve a reference valid for `ttl` that [`BlobStore::fetch`] accepts.
    async fn resolve_fetch_ref(&self, path: &str, ttl: Duration)
    -> Result<FetchRef, StorageError>;

    /// Read the full content behind a reference.
    async fn fetch(&self, fetch_ref: &FetchRef) -> Result<Vec<u8>, StorageError>;

    /// Resolve a short-lived reference and read through it.
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let fetch_ref = self.resolve_fetch_ref(path, Duration::from_secs(60)).await?;
        self.fetch(&fetch_ref).await
    }
}
