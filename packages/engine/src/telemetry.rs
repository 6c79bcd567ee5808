use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::ErrorCode;
use crate::model::{DocumentKey, LoadSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Save,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "code")]
pub enum Outcome {
    Success,
    /// Load of a document that was never saved.
    NotFound,
    Failure(ErrorCode),
}

/// One attempt of a save or load, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    pub operation: Operation,
    pub key: DocumentKey,
    pub outcome: Outcome,
    pub source: Option<LoadSource>,
    pub revision: Option<u64>,
    pub bytes: Option<u64>,
    pub latency: Duration,
}

impl TelemetryEvent {
    pub fn new(operation: Operation, key: DocumentKey, outcome: Outcome, latency: Duration) -> Self {
        Self {
            operation,
            key,
            outcome,
            source: None,
            revision: None,
            bytes: None,
            latency,
        }
    }

    pub fn with_source(mut self, source: LoadSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn is_cache_hit(&self) -> bool {
        self.source == Some(LoadSource::Cache)
    }
}

pub trait TelemetrySink: Send + Sync + 'static {
    fn track(&self, event: &TelemetryEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track(&self, event: &TelemetryEvent) {
        info!(
            operation = ?event.operation,
            key = %event.key,
            outcome = ?event.outcome,
            source = ?event.source,
            revision = ?event.revision,
            bytes = ?event.bytes,
            latency_ms = event.latency.as_millis() as u64,
            "Sync operation finished"
        );
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn for_operation(&self, operation: Operation) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.operation == operation)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track(&self, event: &TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
