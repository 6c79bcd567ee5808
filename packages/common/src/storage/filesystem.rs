use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{
    BlobHead, BlobMeta, BlobStore, FetchRef, META_SUFFIX, PutReceipt, validate_path,
};

const TMP_DIR: &str = ".tmp";

/// Filesystem-backed blob store.
///
/// A blob at `owner/doc/payload-…` lives at `{base_path}/owner/doc/payload-…`
/// with its metadata in a `{file}.meta.json` sidecar. Both files are written
/// to `{base_path}/.tmp` first and renamed into place.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(TMP_DIR)).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn blob_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        if path == TMP_DIR || path.starts_with(".tmp/") {
            return Err(StorageError::InvalidPath(format!(
                "path collides with the staging directory: {path}"
            )));
        }
        Ok(self.base_path.join(path))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(TMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_head(&self, blob_path: &Path) -> Result<Option<BlobHead>, StorageError> {
        if !fs::try_exists(blob_path).await? {
            return Ok(None);
        }
        match fs::read(meta_path(blob_path)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Io(
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("metadata sidecar missing for {}", blob_path.display()),
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn meta_path(blob_path: &Path) -> PathBuf {
    let mut os = blob_path.as_os_str().to_owned();
    os.push(META_SUFFIX);
    PathBuf::from(os)
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(
        &self,
        path: &str,
        data: &[u8],
        meta: BlobMeta,
    ) -> Result<PutReceipt, StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let started = Instant::now();
        let blob_path = self.blob_path(path)?;
        let hash = ContentHash::compute(data);
        let size = data.len() as u64;

        if let Some(existing) = self.read_head(&blob_path).await.ok().flatten() {
            if existing.content_hash == hash {
                return Ok(PutReceipt {
                    size,
                    content_hash: hash,
                    elapsed: started.elapsed(),
                    written: false,
                });
            }
        }

        self.write_atomic(&blob_path, data).await?;

        let head = BlobHead {
            size,
            content_hash: hash,
            meta,
        };
        self.write_atomic(&meta_path(&blob_path), &serde_json::to_vec(&head)?)
            .await?;

        Ok(PutReceipt {
            size,
            content_hash: hash,
            elapsed: started.elapsed(),
            written: true,
        })
    }

    async fn head(&self, path: &str) -> Result<Option<BlobHead>, StorageError> {
        let blob_path = self.blob_path(path)?;
        self.read_head(&blob_path).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let blob_path = self.blob_path(path)?;
        let removed = match fs::remove_file(&blob_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(meta_path(&blob_path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }

    async fn resolve_fetch_ref(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<FetchRef, StorageError> {
        let blob_path = self.blob_path(path)?;
        Ok(FetchRef::new(
            path,
            format!("file://{}", blob_path.display()),
            ttl,
        ))
    }

    async fn fetch(&self, fetch_ref: &FetchRef) -> Result<Vec<u8>, StorageError> {
        fetch_ref.ensure_fresh()?;
        let blob_path = self.blob_path(&fetch_ref.path)?;
        match fs::read(&blob_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(fetch_ref.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
