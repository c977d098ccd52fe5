//! # TriggerState Repository

use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    sea_query::OnConflict,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::trigger_state::{ActiveModel, Column, Entity};

/// Repository for per-instance trigger state
#[derive(Clone)]
pub struct TriggerStateRepository {
    db: DatabaseConnection,
}

impl TriggerStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, instance_id: Uuid, key: &str) -> Result<Option<JsonValue>, DbErr> {
        Ok(Entity::find()
            .filter(Column::InstanceId.eq(instance_id))
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?
            .map(|row| row.value))
    }

    /// Insert or overwrite the value stored under `key`
    pub async fn put(&self, instance_id: Uuid, key: &str, value: JsonValue) -> Result<(), DbErr> {
        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            instance_id: Set(instance_id),
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::columns([Column::InstanceId, Column::Key])
                    .update_columns([Column::Value, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        tracing::debug!(instance_id = %instance_id, key = %key, "Trigger state stored");
        Ok(())
    }

    pub async fn delete(&self, instance_id: Uuid, key: &str) -> Result<(), DbErr> {
        Entity::delete_many()
            .filter(Column::InstanceId.eq(instance_id))
            .filter(Column::Key.eq(key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Remove every key of an instance
    pub async fn clear(&self, instance_id: Uuid) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::InstanceId.eq(instance_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
