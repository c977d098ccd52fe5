//! # TriggerInstance Repository
//!
//! Persistence for enabled triggers and their polling schedule.

use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::framework::TriggerStrategy;
use crate::models::trigger_instance::{
    ActiveModel, Column, Entity, Model, STATUS_DISABLED, STATUS_ENABLED,
};

/// Values for a new trigger instance row
#[derive(Debug, Clone)]
pub struct NewTriggerInstance {
    pub piece_name: String,
    pub trigger_name: String,
    pub strategy: TriggerStrategy,
    pub props: JsonValue,
    pub auth: JsonValue,
    pub poll_interval_seconds: i64,
}

/// Repository for trigger instance database operations
#[derive(Clone)]
pub struct TriggerInstanceRepository {
    db: DatabaseConnection,
}

impl TriggerInstanceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert an enabled instance. Polling instances are due one interval from now.
    pub async fn create(&self, new: NewTriggerInstance) -> Result<Model, DbErr> {
        let now = Utc::now();
        let next_poll_at = match new.strategy {
            TriggerStrategy::Polling => {
                let due = TimeDelta::try_seconds(new.poll_interval_seconds)
                    .and_then(|interval| now.checked_add_signed(interval))
                    .ok_or_else(|| {
                        DbErr::Custom(format!(
                            "poll interval of {}s is out of range",
                            new.poll_interval_seconds
                        ))
                    })?;
                Some(due.fixed_offset())
            }
            TriggerStrategy::Webhook => None,
        };

        let instance = ActiveModel {
            id: Set(Uuid::new_v4()),
            piece_name: Set(new.piece_name),
            trigger_name: Set(new.trigger_name),
            strategy: Set(new.strategy.as_str().to_string()),
            props: Set(new.props),
            auth: Set(new.auth),
            status: Set(STATUS_ENABLED.to_string()),
            poll_interval_seconds: Set(new.poll_interval_seconds),
            next_poll_at: Set(next_poll_at),
            last_polled_at: Set(None),
            last_error: Set(None),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        let result = instance.insert(&self.db).await?;

        tracing::info!(
            instance_id = %result.id,
            piece = %result.piece_name,
            trigger = %result.trigger_name,
            strategy = %result.strategy,
            "Trigger instance created"
        );

        Ok(result)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DbErr> {
        Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    /// Mark disabled and take the instance off the polling schedule
    pub async fn mark_disabled(&self, model: Model) -> Result<Model, DbErr> {
        let mut active: ActiveModel = model.into();
        active.status = Set(STATUS_DISABLED.to_string());
        active.next_poll_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Record the outcome of a run. `next_poll_at` is left untouched when `None`.
    pub async fn record_run(
        &self,
        model: Model,
        polled_at: DateTime<Utc>,
        next_poll_at: Option<DateTime<Utc>>,
        last_error: Option<JsonValue>,
    ) -> Result<Model, DbErr> {
        let mut active: ActiveModel = model.into();
        active.last_polled_at = Set(Some(polled_at.fixed_offset()));
        if let Some(next) = next_poll_at {
            active.next_poll_at = Set(Some(next.fixed_offset()));
        }
        active.last_error = Set(last_error);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Enabled polling instances whose next poll is due, oldest due first
    pub async fn due_for_poll(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(STATUS_ENABLED))
            .filter(Column::Strategy.eq(TriggerStrategy::Polling.as_str()))
            .filter(Column::NextPollAt.lte(now.fixed_offset()))
            .order_by_asc(Column::NextPollAt)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
