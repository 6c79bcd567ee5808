use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tracing::debug;

use crate::config::S3Config;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{
    BlobHead, BlobMeta, BlobStore, FetchRef, META_SUFFIX, PutReceipt, validate_path,
};

/// Longest presigned URL lifetime S3 accepts (7 days).
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

/// S3-compatible object storage.
///
/// Metadata lives in a `{key}.meta.json` sidecar object so the store works
/// against backends without user-metadata support. Fetch references are
/// presigned GET URLs and `fetch` reads through them with a plain HTTP client,
/// so a reference is only as good as its signature.
pub struct ObjectBlobStore {
    bucket: Box<Bucket>,
    http: reqwest::Client,
    prefix: String,
    max_size: u64,
}

impl ObjectBlobStore {
    pub fn new(config: &S3Config, max_size: u64) -> Result<Self, StorageError> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| StorageError::backend(None, format!("invalid region: {e}")))?,
        };

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::backend(None, format!("invalid credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::backend(None, format!("http client: {e}")))?;

        Ok(Self {
            bucket,
            http,
            prefix: config.prefix.trim_matches('/').to_string(),
            max_size,
        })
    }

    fn key_for(&self, path: &str) -> Result<String, StorageError> {
        validate_path(path)?;
        if self.prefix.is_empty() {
            Ok(path.to_string())
        } else {
            Ok(format!("{}/{}", self.prefix, path))
        }
    }

    async fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        match response.status_code() {
            200..=299 => Ok(Some(response.bytes().to_vec())),
            404 => Ok(None),
            status => Err(StorageError::backend(
                Some(status),
                format!("GET {key} failed"),
            )),
        }
    }

    async fn write_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        match response.status_code() {
            200..=299 => Ok(()),
            status => Err(StorageError::backend(
                Some(status),
                format!("PUT {key} failed"),
            )),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        match response.status_code() {
            200..=299 | 404 => Ok(()),
            status => Err(StorageError::backend(
                Some(status),
                format!("DELETE {key} failed"),
            )),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
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
        let key = self.key_for(path)?;
        let hash = ContentHash::compute(data);
        let size = data.len() as u64;

        if let Some(existing) = self.head(path).await.ok().flatten() {
            if existing.content_hash == hash {
                debug!(key = %key, "Identical object already stored, skipping upload");
                return Ok(PutReceipt {
                    size,
                    content_hash: hash,
                    elapsed: started.elapsed(),
                    written: false,
                });
            }
        }

        let content_type = meta.content_type.clone();
        self.write_object(&key, data, &content_type).await?;

        let head = BlobHead {
            size,
            content_hash: hash,
            meta,
        };
        self.write_object(
            &format!("{key}{META_SUFFIX}"),
            &serde_json::to_vec(&head)?,
            "application/json",
        )
        .await?;

        Ok(PutReceipt {
            size,
            content_hash: hash,
            elapsed: started.elapsed(),
            written: true,
        })
    }

    async fn head(&self, path: &str) -> Result<Option<BlobHead>, StorageError> {
        let key = self.key_for(path)?;
        let (_, status) = self
            .bucket
            .head_object(&key)
            .await
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        match status {
            200..=299 => {}
            404 => return Ok(None),
            status => {
                return Err(StorageError::backend(
                    Some(status),
                    format!("HEAD {key} failed"),
                ));
            }
        }

        match self.read_object(&format!("{key}{META_SUFFIX}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Err(StorageError::backend(
                None,
                format!("metadata sidecar missing for {key}"),
            )),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let key = self.key_for(path)?;
        let existed = self.head(path).await.ok().flatten().is_some();
        self.delete_object(&key).await?;
        self.delete_object(&format!("{key}{META_SUFFIX}")).await?;
        Ok(existed)
    }

    async fn resolve_fetch_ref(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<FetchRef, StorageError> {
        let key = self.key_for(path)?;
        let expiry_secs = presign_secs(ttl);
        // Taken before signing so the recorded expiry never outlives the URL.
        let signed_at = Utc::now();
        let url = self
            .bucket
            .presign_get(&key, expiry_secs, None)
            .await
            .map_err(|e| StorageError::backend(None, e.to_string()))?;
        Ok(FetchRef {
            path: path.to_string(),
            location: url,
            expires_at: signed_at + chrono::Duration::seconds(i64::from(expiry_secs)),
        })
    }

    async fn fetch(&self, fetch_ref: &FetchRef) -> Result<Vec<u8>, StorageError> {
        fetch_ref.ensure_fresh()?;
        let response = self
            .http
            .get(&fetch_ref.location)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(fetch_ref.path.clone()));
        }
        if !status.is_success() {
            return Err(StorageError::backend(
                Some(status.as_u16()),
                format!("presigned GET for {} failed", fetch_ref.path),
            ));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: bytes.len() as u64,
                limit: self.max_size,
            });
        }
        Ok(bytes.to_vec())
    }
}

/// Presigned URL lifetime for a requested TTL, within what S3 accepts.
fn presign_secs(ttl: Duration) -> u32 {
    ttl.as_secs().clamp(1, MAX_PRESIGN_SECS) as u32
}

fn transport_error(e: reqwest::Error) -> StorageError {
    if e.is_timeout() {
        StorageError::Io(io::Error::new(io::ErrorKind::TimedOut, e))
    } else if e.is_connect() {
        StorageError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, e))
    } else {
        // The message may embed the signed URL; keep only the error kind.
        StorageError::backend(e.status().map(|s| s.as_u16()), e.without_url().to_string())
    }
}
