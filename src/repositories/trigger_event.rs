//! # TriggerEvent Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::trigger_event::{ActiveModel, Column, Entity, EventSource, Model};

/// Room for this many events per run inside one microsecond tick
const SEQUENCE_SLOTS_PER_MICRO: i64 = 1000;

/// Repository for events emitted by trigger runs
#[derive(Clone)]
pub struct TriggerEventRepository {
    db: DatabaseConnection,
}

impl TriggerEventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Store the events of one run in a single transaction. Events of a run
    /// keep their emitted order: the first payload gets the highest sequence,
    /// so newest-first listings show it first.
    pub async fn record(
        &self,
        instance_id: Uuid,
        source: EventSource,
        payloads: &[JsonValue],
    ) -> Result<Vec<Model>, DbErr> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let base = now.timestamp_micros() * SEQUENCE_SLOTS_PER_MICRO;
        let count = payloads.len() as i64;

        let txn = self.db.begin().await?;
        let mut stored = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            let event = ActiveModel {
                id: Set(Uuid::new_v4()),
                instance_id: Set(instance_id),
                source: Set(source.as_str().to_string()),
                payload: Set(payload.clone()),
                sequence: Set(base + (count - index as i64)),
                created_at: Set(now.fixed_offset()),
            };
            stored.push(event.insert(&txn).await?);
        }
        txn.commit().await?;

        tracing::info!(
            instance_id = %instance_id,
            source = source.as_str(),
            count = stored.len(),
            "Trigger events recorded"
        );

        Ok(stored)
    }

    /// Most recent events first
    pub async fn list_recent(&self, instance_id: Uuid, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::InstanceId.eq(instance_id))
            .order_by_desc(Column::Sequence)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
