//! Blob path layout: `{owner}/{resource}/payload-{revision:010}-{nonce}.{ext}`.
//!
//! The zero-padded revision keeps paths sortable. The nonce makes every path
//! unique, so a delayed cleanup can never remove a blob a later save wrote.

use uuid::Uuid;

use crate::model::DocumentKey;

const PAYLOAD_PREFIX: &str = "payload-";

pub fn blob_path(key: &DocumentKey, revision: u64, extension: &str) -> String {
    let nonce = Uuid::now_v7().simple();
    format!(
        "{}/{}/{PAYLOAD_PREFIX}{revision:010}-{nonce}.{extension}",
        key.owner_id(),
        key.resource_id()
    )
}

/// Revision embedded in a blob path written by [`blob_path`].
pub fn parse_revision(path: &str) -> Option<u64> {
    let file = path.rsplit('/').next()?;
    let rest = file.strip_prefix(PAYLOAD_PREFIX)?;
    let (digits, _) = rest.split_once('-')?;
    digits.parse().ok()
}
