use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::retry::retry_async;
use common::storage::{BlobMeta, BlobStore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::PayloadCache;
use crate::classify::timed_out;
use crate::codec::PayloadCodec;
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, PointerConflictResolver};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::model::{
    DocumentKey, LoadOptions, LoadResult, LoadSource, LoadedDocument, PointerRecord, SaveOptions,
    SaveOutcome,
};
use crate::mutex::KeyedMutex;
use crate::path::{blob_path, parse_revision};
use crate::pointer::{PointerError, PointerStore, WriteGuard};
use crate::status::{
    ConflictNotice, ErrorNotice, StatusEvent, StatusSink, SyncStatus, TracingStatusSink,
};
use crate::telemetry::{Operation, Outcome, TelemetryEvent, TelemetrySink, TracingTelemetry};

/// Saves and loads versioned documents across a blob store and a pointer
/// store.
///
/// A save uploads the payload to a fresh path and then advances the pointer
/// in one conditional write, so readers only ever see a fully written blob.
/// Saves for the same document are serialized within the process; across
/// processes the pointer store's conditional write decides the winner.
pub struct SyncEngine<C: PayloadCodec> {
    blobs: Arc<dyn BlobStore>,
    pointers: Arc<dyn PointerStore>,
    resolver: Arc<dyn ConflictResolver>,
    codec: Arc<C>,
    cache: PayloadCache<C::Payload>,
    locks: KeyedMutex<DocumentKey>,
    status: Dispatcher<StatusEvent>,
    telemetry: Dispatcher<TelemetryEvent>,
    cleanups: Mutex<JoinSet<()>>,
    config: EngineConfig,
}

pub struct SyncEngineBuilder<C: PayloadCodec> {
    codec: C,
    blobs: Arc<dyn BlobStore>,
    pointers: Arc<dyn PointerStore>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    status_sink: Arc<dyn StatusSink>,
    telemetry_sink: Arc<dyn TelemetrySink>,
    config: EngineConfig,
}

impl<C: PayloadCodec> SyncEngineBuilder<C> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default resolver, which re-reads the pointer store.
    pub fn resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    pub fn telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry_sink = sink;
        self
    }

    /// Build the engine. Spawns the notification tasks, so this must run
    /// inside a tokio runtime.
    pub fn build(self) -> SyncEngine<C> {
        let capacity = self.config.notification_capacity;

        let status_sink = self.status_sink;
        let status = Dispatcher::spawn("status", capacity, move |event: StatusEvent| {
            event.deliver(status_sink.as_ref())
        });

        let telemetry_sink = self.telemetry_sink;
        let telemetry = Dispatcher::spawn("telemetry", capacity, move |event: TelemetryEvent| {
            telemetry_sink.track(&event)
        });

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(PointerConflictResolver::new(self.pointers.clone())));

        SyncEngine {
            blobs: self.blobs,
            pointers: self.pointers,
            resolver,
            codec: Arc::new(self.codec),
            cache: PayloadCache::new(self.config.cache_ttl()),
            locks: KeyedMutex::new(),
            status,
            telemetry,
            cleanups: Mutex::new(JoinSet::new()),
            config: self.config,
        }
    }
}

impl<C: PayloadCodec> SyncEngine<C> {
    pub fn builder(
        codec: C,
        blobs: Arc<dyn BlobStore>,
        pointers: Arc<dyn PointerStore>,
    ) -> SyncEngineBuilder<C> {
        SyncEngineBuilder {
            codec,
            blobs,
            pointers,
            resolver: None,
            status_sink: Arc::new(TracingStatusSink),
            telemetry_sink: Arc::new(TracingTelemetry),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn cache(&self) -> &PayloadCache<C::Payload> {
        &self.cache
    }

    /// Save `payload` as the next revision of a document.
    pub async fn save(
        &self,
        owner_id: &str,
        resource_id: &str,
        payload: &C::Payload,
        options: SaveOptions,
    ) -> Result<SaveOutcome> {
        let key = DocumentKey::new(owner_id, resource_id)?;
        let started = Instant::now();

        let result = self
            .locks
            .run_exclusive(&key, self.save_exclusive(&key, payload, &options))
            .await;

        let latency = started.elapsed();
        match &result {
            Ok(outcome) => {
                self.telemetry.dispatch(
                    TelemetryEvent::new(Operation::Save, key.clone(), Outcome::Success, latency)
                        .with_revision(outcome.revision)
                        .with_bytes(outcome.size_bytes),
                );
            }
            Err(e) => {
                self.report_failure(&key, e);
                self.telemetry.dispatch(TelemetryEvent::new(
                    Operation::Save,
                    key.clone(),
                    Outcome::Failure(e.code()),
                    latency,
                ));
            }
        }
        result
    }

    async fn save_exclusive(
        &self,
        key: &DocumentKey,
        payload: &C::Payload,
        options: &SaveOptions,
    ) -> Result<SaveOutcome> {
        self.status
            .dispatch(StatusEvent::Status(key.clone(), SyncStatus::Syncing));

        let bytes = self.codec.encode(payload)?;

        let current = self.timed("pointer read", self.pointers.get(key)).await?;
        let current_revision = current.as_ref().map_or(0, |r| r.revision);

        if !options.force_overwrite && current_revision != 0 {
            let expected = options.expected_revision.unwrap_or(current_revision);
            let check = self
                .timed(
                    "conflict check",
                    self.resolver.detect_conflict(key, expected),
                )
                .await?;
            if check.has_conflict {
                return Err(SyncError::Conflict {
                    resource: key.to_string(),
                    expected,
                    live: check.live_revision,
                });
            }
        }

        let new_revision = current_revision + 1;
        let path = blob_path(key, new_revision, self.codec.extension());

        // Phase 1: nothing is visible until the pointer moves.
        let receipt = self
            .timed(
                "blob upload",
                self.blobs.put(
                    &path,
                    &bytes,
                    BlobMeta::new(new_revision, self.codec.content_type()),
                ),
            )
            .await?;
        debug!(
            key = %key,
            path = %path,
            size = receipt.size,
            elapsed_ms = receipt.elapsed.as_millis() as u64,
            "Uploaded payload"
        );

        // Phase 2: advance the pointer only if nobody got there first.
        let record = PointerRecord {
            owner_id: key.owner_id().to_string(),
            resource_id: key.resource_id().to_string(),
            blob_path: path.clone(),
            revision: new_revision,
            payload_size_bytes: receipt.size,
            synced_at: Utc::now(),
            summary: options
                .summary
                .clone()
                .unwrap_or_else(|| self.codec.summarize(payload)),
        };
        let limit = self.config.operation_timeout();
        match tokio::time::timeout(
            limit,
            self.pointers
                .conditional_set(record, WriteGuard::advancing_to(new_revision)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e @ PointerError::Stale { .. })) => {
                // Definitely not committed, and the path is unique to us.
                self.spawn_cleanup(path, "orphaned upload");
                return Err(e.into());
            }
            Ok(Err(e)) => return Err(e.into()),
            // The commit may still land, so the upload must stay.
            Err(_) => return Err(timed_out("pointer advance", limit)),
        }

        if let Some(previous) = current {
            if previous.blob_path != path {
                self.spawn_cleanup(previous.blob_path, "superseded payload");
            }
        }

        self.cache.invalidate(key);

        info!(
            key = %key,
            revision = new_revision,
            size = receipt.size,
            "Saved document"
        );
        self.status.dispatch(StatusEvent::Status(
            key.clone(),
            SyncStatus::Synced {
                revision: new_revision,
            },
        ));

        Ok(SaveOutcome {
            revision: new_revision,
            blob_path: path,
            size_bytes: receipt.size,
        })
    }

    /// [`SyncEngine::save`], retried with backoff while it fails transiently.
    pub async fn save_with_retry(
        &self,
        owner_id: &str,
        resource_id: &str,
        payload: &C::Payload,
        options: SaveOptions,
    ) -> Result<SaveOutcome> {
        retry_async(
            &self.config.retry,
            "save",
            SyncError::is_retryable,
            move |_| self.save(owner_id, resource_id, payload, options.clone()),
        )
        .await
        .map_err(|exhausted| exhausted.last_error)
    }

    /// Load the current revision of a document.
    pub async fn load(
        &self,
        owner_id: &str,
        resource_id: &str,
        options: LoadOptions,
    ) -> Result<LoadResult<C::Payload>> {
        let key = DocumentKey::new(owner_id, resource_id)?;
        let started = Instant::now();

        if self.config.cache_enabled && options.use_cache {
            if let Some((payload, record)) = self.cache.get(&key) {
                debug!(key = %key, revision = record.revision, "Cache hit");
                self.telemetry.dispatch(
                    TelemetryEvent::new(
                        Operation::Load,
                        key.clone(),
                        Outcome::Success,
                        started.elapsed(),
                    )
                    .with_source(LoadSource::Cache)
                    .with_revision(record.revision),
                );
                return Ok(LoadResult::Loaded(LoadedDocument {
                    payload,
                    record,
                    source: LoadSource::Cache,
                }));
            }
        }

        let result = self.load_from_backend(&key).await;

        let latency = started.elapsed();
        let event = match &result {
            Ok(LoadResult::Loaded(doc)) => {
                TelemetryEvent::new(Operation::Load, key.clone(), Outcome::Success, latency)
                    .with_source(LoadSource::Backend)
                    .with_revision(doc.record.revision)
                    .with_bytes(doc.record.payload_size_bytes)
            }
            Ok(LoadResult::NotFound) => {
                TelemetryEvent::new(Operation::Load, key.clone(), Outcome::NotFound, latency)
                    .with_source(LoadSource::Backend)
            }
            Err(e) => {
                self.report_failure(&key, e);
                TelemetryEvent::new(
                    Operation::Load,
                    key.clone(),
                    Outcome::Failure(e.code()),
                    latency,
                )
            }
        };
        self.telemetry.dispatch(event);
        result
    }

    async fn load_from_backend(&self, key: &DocumentKey) -> Result<LoadResult<C::Payload>> {
        // Taken before the pointer read so a save that lands meanwhile
        // keeps this load from caching the old payload.
        let ticket = self.cache.ticket(key);

        let Some(record) = self.timed("pointer read", self.pointers.get(key)).await? else {
            return Ok(LoadResult::NotFound);
        };

        if parse_revision(&record.blob_path) != Some(record.revision) {
            return Err(SyncError::Unknown(format!(
                "pointer for {key} is at revision {} but names {}",
                record.revision, record.blob_path
            )));
        }

        let fetch_ref = self
            .timed(
                "fetch reference",
                self.blobs
                    .resolve_fetch_ref(&record.blob_path, self.config.fetch_ref_ttl()),
            )
            .await?;
        let bytes = self.timed("blob fetch", self.blobs.fetch(&fetch_ref)).await?;
        let payload = self.codec.decode(&bytes)?;

        if self.config.cache_enabled {
            self.cache
                .fill(key, ticket, payload.clone(), record.clone());
        }

        Ok(LoadResult::Loaded(LoadedDocument {
            payload,
            record,
            source: LoadSource::Backend,
        }))
    }

    /// Current pointer record, without fetching the payload.
    pub async fn head(&self, owner_id: &str, resource_id: &str) -> Result<Option<PointerRecord>> {
        let key = DocumentKey::new(owner_id, resource_id)?;
        self.timed("pointer read", self.pointers.get(&key)).await
    }

    /// Pointer records of every document an owner has saved.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<PointerRecord>> {
        if owner_id.trim().is_empty() {
            return Err(SyncError::AuthRequired);
        }
        self.timed("pointer list", self.pointers.list(owner_id))
            .await
    }

    /// Drop the cached payload for a document.
    pub fn invalidate(&self, owner_id: &str, resource_id: &str) -> Result<()> {
        let key = DocumentKey::new(owner_id, resource_id)?;
        self.cache.invalidate(&key);
        Ok(())
    }

    /// Wait until queued status and telemetry events have been delivered.
    pub async fn flush_notifications(&self) {
        self.status.flush().await;
        self.telemetry.flush().await;
    }

    /// Wait for every blob cleanup started so far.
    pub async fn wait_for_cleanup(&self) {
        let mut pending = {
            let mut cleanups = self
                .cleanups
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *cleanups)
        };
        while pending.join_next().await.is_some() {}
    }

    /// Delete a blob in the background. Failures are logged and dropped.
    fn spawn_cleanup(&self, path: String, reason: &'static str) {
        let blobs = self.blobs.clone();
        let limit = self.config.operation_timeout();

        let mut cleanups = self
            .cleanups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while cleanups.try_join_next().is_some() {}

        cleanups.spawn(async move {
            match tokio::time::timeout(limit, blobs.delete(&path)).await {
                Ok(Ok(true)) => debug!(path = %path, reason, "Deleted blob"),
                Ok(Ok(false)) => warn!(path = %path, reason, "Blob to delete was already gone"),
                Ok(Err(e)) => warn!(path = %path, reason, error = %e, "Failed to delete blob"),
                Err(_) => warn!(path = %path, reason, "Timed out deleting blob"),
            }
        });
    }

    fn report_failure(&self, key: &DocumentKey, err: &SyncError) {
        match err {
            SyncError::Conflict { expected, live, .. } => {
                warn!(key = %key, expected, live = ?live, "Save rejected, document changed elsewhere");
                self.status.dispatch(StatusEvent::Conflict(
                    key.clone(),
                    ConflictNotice {
                        expected: *expected,
                        live: *live,
                    },
                ));
            }
            SyncError::StaleWrite { attempted, live } => {
                warn!(key = %key, attempted, live = ?live, "Lost pointer race");
                self.status.dispatch(StatusEvent::Conflict(
                    key.clone(),
                    ConflictNotice {
                        expected: attempted.saturating_sub(1),
                        live: *live,
                    },
                ));
            }
            _ => {
                error!(
                    key = %key,
                    code = %err.code(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Sync operation failed"
                );
                self.status.dispatch(StatusEvent::Error(
                    key.clone(),
                    ErrorNotice {
                        code: err.code(),
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                    },
                ));
            }
        }
    }

    /// Run one backend call under the operation timeout and classify its
    /// failure.
    async fn timed<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<SyncError>,
    {
        let limit: Duration = self.config.operation_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(timed_out(operation, limit)),
        }
    }
}
