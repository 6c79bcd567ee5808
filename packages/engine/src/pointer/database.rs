use async_trait::async_trait;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, TransactionTrait,
};
use tracing::debug;

use super::{PointerError, PointerStore, WriteGuard};
use crate::entity::pointer_record;
use crate::model::{DocumentKey, PointerRecord};

/// Pointer store backed by the `pointer_record` table.
///
/// `conditional_set` runs in one transaction: the row is read with
/// `FOR UPDATE`, checked against the guard, then updated or inserted. Two
/// first writes racing on the same key are separated by the primary key; the
/// loser sees a unique violation and reports `Stale`.
#[derive(Clone)]
pub struct DatabasePointerStore {
    db: DatabaseConnection,
}

impl DatabasePointerStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn to_i64(field: &str, value: u64) -> Result<i64, PointerError> {
    i64::try_from(value)
        .map_err(|_| PointerError::Corrupt(format!("{field} {value} does not fit the column")))
}

impl TryFrom<pointer_record::Model> for PointerRecord {
    type Error = PointerError;

    fn try_from(row: pointer_record::Model) -> Result<Self, Self::Error> {
        let revision = u64::try_from(row.revision).map_err(|_| {
            PointerError::Corrupt(format!(
                "negative revision {} for {}/{}",
                row.revision, row.owner_id, row.resource_id
            ))
        })?;
        let payload_size_bytes = u64::try_from(row.payload_size).map_err(|_| {
            PointerError::Corrupt(format!(
                "negative payload size {} for {}/{}",
                row.payload_size, row.owner_id, row.resource_id
            ))
        })?;

        Ok(PointerRecord {
            owner_id: row.owner_id,
            resource_id: row.resource_id,
            blob_path: row.blob_path,
            revision,
            payload_size_bytes,
            synced_at: row.synced_at,
            summary: row.summary,
        })
    }
}

fn active_model(record: &PointerRecord) -> Result<pointer_record::ActiveModel, PointerError> {
    Ok(pointer_record::ActiveModel {
        owner_id: Set(record.owner_id.clone()),
        resource_id: Set(record.resource_id.clone()),
        blob_path: Set(record.blob_path.clone()),
        revision: Set(to_i64("revision", record.revision)?),
        payload_size: Set(to_i64("payload size", record.payload_size_bytes)?),
        summary: Set(record.summary.clone()),
        synced_at: Set(record.synced_at),
    })
}

#[async_trait]
impl PointerStore for DatabasePointerStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<PointerRecord>, PointerError> {
        pointer_record::Entity::find_by_id((
            key.owner_id().to_string(),
            key.resource_id().to_string(),
        ))
        .one(&self.db)
        .await?
        .map(PointerRecord::try_from)
        .transpose()
    }

    async fn conditional_set(
        &self,
        record: PointerRecord,
        guard: WriteGuard,
    ) -> Result<(), PointerError> {
        let model = active_model(&record)?;
        let txn = self.db.begin().await?;

        let existing = pointer_record::Entity::find_by_id((
            record.owner_id.clone(),
            record.resource_id.clone(),
        ))
        .lock(LockType::Update)
        .one(&txn)
        .await?;

        match existing {
            Some(row) => {
                let current = u64::try_from(row.revision).map_err(|_| {
                    PointerError::Corrupt(format!("negative revision {}", row.revision))
                })?;
                if !guard.admits(Some(current)) {
                    txn.rollback().await?;
                    return Err(guard.refused(current));
                }
                model.update(&txn).await?;
            }
            None => match model.insert(&txn).await {
                Ok(_) => {}
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    txn.rollback().await?;
                    let key = record
                        .key()
                        .map_err(|e| PointerError::Corrupt(e.to_string()))?;
                    let current = self.get(&key).await?.map(|r| r.revision).ok_or_else(|| {
                        PointerError::Corrupt(
                            "UniqueConstraintViolation but existing row not found".to_string(),
                        )
                    })?;
                    debug!(key = %key, current, "Lost first-write race");
                    return Err(guard.refused(current));
                }
                Err(e) => return Err(e.into()),
            },
        }

        txn.commit().await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<PointerRecord>, PointerError> {
        pointer_record::Entity::find()
            .filter(pointer_record::Column::OwnerId.eq(owner_id))
            .order_by_asc(pointer_record::Column::ResourceId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(PointerRecord::try_from)
            .collect()
    }
}
