use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Owner + resource identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    owner_id: String,
    resource_id: String,
}

impl DocumentKey {
    /// Validate and build a key.
    ///
    /// A blank owner means the caller is not signed in and yields
    /// [`SyncError::AuthRequired`]. Ids are embedded in blob paths, so path
    /// separators and dot segments are rejected.
    pub fn new(owner_id: impl Into<String>, resource_id: impl Into<String>) -> Result<Self, SyncError> {
        let owner_id = owner_id.into();
        let resource_id = resource_id.into();

        if owner_id.trim().is_empty() {
            return Err(SyncError::AuthRequired);
        }
        validate_id("owner id", &owner_id)?;
        validate_id("resource id", &resource_id)?;

        Ok(Self {
            owner_id,
            resource_id,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.resource_id)
    }
}

fn validate_id(what: &str, id: &str) -> Result<(), SyncError> {
    if id.trim().is_empty() {
        return Err(SyncError::InvalidKey(format!("{what} is empty")));
    }
    if id.contains('/') || id.contains('\\') || id == "." || id.contains("..") {
        return Err(SyncError::InvalidKey(format!(
            "{what} must not contain path separators or '..': {id}"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(SyncError::InvalidKey(format!(
            "{what} contains control characters"
        )));
    }
    Ok(())
}

/// Current-revision metadata for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRecord {
    pub owner_id: String,
    pub resource_id: String,
    /// Blob store path of the current payload.
    pub blob_path: String,
    /// Starts at 1 on first save and grows by exactly one per save.
    pub revision: u64,
    pub payload_size_bytes: u64,
    pub synced_at: DateTime<Utc>,
    /// Denormalized listing fields (title, tags, ...).
    pub summary: serde_json::Value,
}

impl PointerRecord {
    pub fn key(&self) -> Result<DocumentKey, SyncError> {
        DocumentKey::new(self.owner_id.clone(), self.resource_id.clone())
    }
}

/// Options for [`crate::SyncEngine::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Skip the conflict check and write on top of whatever is live.
    pub force_overwrite: bool,
    /// Revision the caller last observed. Defaults to the revision the
    /// engine reads at the start of the save.
    pub expected_revision: Option<u64>,
    /// Listing fields to store on the pointer. Defaults to the codec's summary.
    pub summary: Option<serde_json::Value>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }

    pub fn with_expected_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Options for [`crate::SyncEngine::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Serve from the cache when a fresh entry exists. Default: true.
    pub use_cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

impl LoadOptions {
    pub fn bypass_cache() -> Self {
        Self { use_cache: false }
    }
}

/// Result of a committed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub revision: u64,
    pub blob_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Cache,
    Backend,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Cache => f.write_str("cache"),
            LoadSource::Backend => f.write_str("backend"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDocument<T> {
    pub payload: T,
    pub record: PointerRecord,
    pub source: LoadSource,
}

/// Outcome of a load. A never-saved document is a valid result, not an error.
#[derive(Debug, Clone)]
pub enum LoadResult<T> {
    Loaded(LoadedDocument<T>),
    NotFound,
}

impl<T> LoadResult<T> {
    pub fn into_loaded(self) -> Option<LoadedDocument<T>> {
        match self {
            LoadResult::Loaded(doc) => Some(doc),
            LoadResult::NotFound => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadResult::NotFound)
    }
}
