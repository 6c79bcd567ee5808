pub mod cache;
pub mod classify;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod database;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod model;
pub mod mutex;
pub mod path;
pub mod pointer;
pub mod status;
pub mod telemetry;

mod engine;

pub use codec::{CodecError, JsonCodec, PayloadCodec};
pub use config::{DatabaseConfig, EngineConfig};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{ErrorCode, SyncError};
pub use model::{
    DocumentKey, LoadOptions, LoadResult, LoadSource, LoadedDocument, PointerRecord, SaveOptions,
    SaveOutcome,
};
pub use pointer::{DatabasePointerStore, MemoryPointerStore, PointerError, PointerStore, WriteGuard};
