use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Converts between a typed payload and the bytes stored in the blob store.
///
/// The engine never looks inside a payload; everything it needs to know
/// about the shape comes through this trait.
pub trait PayloadCodec: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    /// MIME type recorded in blob metadata.
    fn content_type(&self) -> &str;

    /// File extension used in blob paths, without the dot.
    fn extension(&self) -> &str;

    fn encode(&self, payload: &Self::Payload) -> Result<Vec<u8>, CodecError>;

    /// Decode stored bytes. Must fail rather than return a partial value.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Payload, CodecError>;

    /// Listing fields denormalized onto the pointer record.
    fn summarize(&self, _payload: &Self::Payload) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// JSON codec for any serde type.
pub struct JsonCodec<T> {
    summary_fields: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            summary_fields: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Copy these top-level fields of the encoded payload into the summary.
    pub fn with_summary_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.summary_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Payload = T;

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, payload: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn summarize(&self, payload: &T) -> serde_json::Value {
        if self.summary_fields.is_empty() {
            return serde_json::Value::Null;
        }
        let Ok(serde_json::Value::Object(object)) = serde_json::to_value(payload) else {
            return serde_json::Value::Null;
        };
        let summary: serde_json::Map<_, _> = self
            .summary_fields
            .iter()
            .filter_map(|field| object.get(field).map(|v| (field.clone(), v.clone())))
            .collect();
        serde_json::Value::Object(summary)
    }
}
