use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Current revision of one document. Mutated only through
/// `DatabasePointerStore::conditional_set`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pointer_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub resource_id: String,

    pub blob_path: String,
    pub revision: i64,
    pub payload_size: i64,

    /// Denormalized listing fields.
    #[sea_orm(column_type = "JsonBinary")]
    pub summary: Json,

    pub synced_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
