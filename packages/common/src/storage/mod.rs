mod error;
mod hash;
mod traits;

pub mod filesystem;
pub mod memory;
#[cfg(feature = "object-storage")]
pub mod object;

pub use error::StorageError;
pub use hash::ContentHash;
pub use traits::{BlobHead, BlobMeta, BlobStore, FetchRef, META_SUFFIX, PutReceipt, validate_path};
