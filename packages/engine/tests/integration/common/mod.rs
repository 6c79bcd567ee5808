use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ::common::storage::memory::MemoryBlobStore;
use ::common::storage::{BlobHead, BlobMeta, BlobStore, FetchRef, PutReceipt, StorageError};
use engine::config::EngineConfig;
use engine::model::{DocumentKey, PointerRecord};
use engine::pointer::{MemoryPointerStore, PointerError, PointerStore, WriteGuard};
use engine::status::RecordingStatusSink;
use engine::telemetry::RecordingTelemetry;
use engine::{JsonCodec, SyncEngine};
use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;

pub const OWNER: &str = "alice";
pub const RESOURCE: &str = "resume";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub title: String,
    pub version: u64,
    pub body: String,
}

pub fn doc(title: &str, version: u64) -> Doc {
    Doc {
        title: title.to_string(),
        version,
        body: format!("{title} body v{version}"),
    }
}

pub fn key() -> DocumentKey {
    DocumentKey::new(OWNER, RESOURCE).unwrap()
}

/// Parks every call that passes through it until the test releases it.
///
/// `parked` operations plus the test itself meet at `arrived`, then again at
/// `release`.
#[derive(Clone)]
pub struct Gate {
    arrived: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Gate {
    pub fn new(parked: usize) -> Self {
        Self {
            arrived: Arc::new(Barrier::new(parked + 1)),
            release: Arc::new(Barrier::new(parked + 1)),
        }
    }

    async fn pass(&self) {
        self.arrived.wait().await;
        self.release.wait().await;
    }

    /// Returns once every parked operation has reached the gate.
    pub async fn wait_arrived(&self) {
        self.arrived.wait().await;
    }

    pub async fn release(&self) {
        self.release.wait().await;
    }
}

/// Blob store wrapper with switchable failures and a fetch gate.
pub struct FaultyBlobStore {
    inner: MemoryBlobStore,
    put_failures: AtomicU32,
    fail_deletes: AtomicBool,
    fetch_gate: Mutex<Option<Gate>>,
    puts: AtomicUsize,
}

impl FaultyBlobStore {
    pub fn new(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            put_failures: AtomicU32::new(0),
            fail_deletes: AtomicBool::new(false),
            fetch_gate: Mutex::new(None),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }

    /// Fail the next `n` uploads with a 503.
    pub fn fail_next_puts(&self, n: u32) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn gate_fetches(&self, gate: Option<Gate>) {
        *self.fetch_gate.lock().unwrap() = gate;
    }

    /// Upload attempts seen, including failed ones.
    pub fn put_attempts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(
        &self,
        path: &str,
        data: &[u8],
        meta: BlobMeta,
    ) -> Result<PutReceipt, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::backend(Some(503), "service unavailable"));
        }
        self.inner.put(path, data, meta).await
    }

    async fn head(&self, path: &str) -> Result<Option<BlobHead>, StorageError> {
        self.inner.head(path).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::backend(Some(500), "delete failed"));
        }
        self.inner.delete(path).await
    }

    async fn resolve_fetch_ref(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<FetchRef, StorageError> {
        self.inner.resolve_fetch_ref(path, ttl).await
    }

    async fn fetch(&self, fetch_ref: &FetchRef) -> Result<Vec<u8>, StorageError> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.inner.fetch(fetch_ref).await
    }
}

/// Pointer store wrapper with switchable failures, hangs and a write gate.
pub struct FaultyPointerStore {
    inner: MemoryPointerStore,
    set_failures: AtomicU32,
    hang_sets: AtomicBool,
    set_gate: Mutex<Option<Gate>>,
    reads: AtomicUsize,
}

impl FaultyPointerStore {
    pub fn new(inner: MemoryPointerStore) -> Self {
        Self {
            inner,
            set_failures: AtomicU32::new(0),
            hang_sets: AtomicBool::new(false),
            set_gate: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryPointerStore {
        &self.inner
    }

    /// Fail the next `n` conditional writes as unavailable.
    pub fn fail_next_sets(&self, n: u32) {
        self.set_failures.store(n, Ordering::SeqCst);
    }

    /// Make conditional writes never complete.
    pub fn hang_sets(&self, hang: bool) {
        self.hang_sets.store(hang, Ordering::SeqCst);
    }

    pub fn gate_sets(&self, gate: Option<Gate>) {
        *self.set_gate.lock().unwrap() = gate;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write a record directly, as another writer would.
    pub async fn force(&self, record: PointerRecord) {
        let floor = record.revision;
        self.inner
            .conditional_set(record, WriteGuard::advancing_to(floor))
            .await
            .unwrap();
    }
}

#[async_trait]
impl PointerStore for FaultyPointerStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<PointerRecord>, PointerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn conditional_set(
        &self,
        record: PointerRecord,
        guard: WriteGuard,
    ) -> Result<(), PointerError> {
        let gate = self.set_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.hang_sets.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .set_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PointerError::Unavailable("connection reset by peer".into()));
        }
        self.inner.conditional_set(record, guard).await
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<PointerRecord>, PointerError> {
        self.inner.list(owner_id).await
    }
}

pub type TestEngine = SyncEngine<JsonCodec<Doc>>;

/// One engine over fault-injectable memory backends, with recording sinks.
pub struct Harness {
    pub engine: Arc<TestEngine>,
    pub blobs: Arc<FaultyBlobStore>,
    pub pointers: Arc<FaultyPointerStore>,
    pub status: RecordingStatusSink,
    pub telemetry: RecordingTelemetry,
    config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let blobs = Arc::new(FaultyBlobStore::new(MemoryBlobStore::new()));
        let pointers = Arc::new(FaultyPointerStore::new(MemoryPointerStore::new()));
        Self::over(blobs, pointers, config)
    }

    /// A second engine sharing this harness's backends, standing in for
    /// another process.
    pub fn peer(&self) -> Self {
        Self::over(self.blobs.clone(), self.pointers.clone(), self.config.clone())
    }

    fn over(
        blobs: Arc<FaultyBlobStore>,
        pointers: Arc<FaultyPointerStore>,
        config: EngineConfig,
    ) -> Self {
        let status = RecordingStatusSink::new();
        let telemetry = RecordingTelemetry::new();
        let engine = SyncEngine::builder(
            JsonCodec::<Doc>::new().with_summary_fields(["title"]),
            blobs.clone(),
            pointers.clone(),
        )
        .config(config.clone())
        .status_sink(Arc::new(status.clone()))
        .telemetry_sink(Arc::new(telemetry.clone()))
        .build();

        Self {
            engine: Arc::new(engine),
            blobs,
            pointers,
            status,
            telemetry,
            config,
        }
    }

    /// Wait for background cleanup and notification delivery.
    pub async fn settle(&self) {
        self.engine.wait_for_cleanup().await;
        self.engine.flush_notifications().await;
    }
}

pub fn fast_retry_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}
