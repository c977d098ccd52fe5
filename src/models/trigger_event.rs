//! TriggerEvent entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Poll,
    Webhook,
    Test,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Poll => "poll",
            EventSource::Webhook => "webhook",
            EventSource::Test => "test",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub instance_id: Uuid,

    /// `poll`, `webhook` or `test`
    pub source: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Monotonic ordering key; larger is newer
    pub sequence: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trigger_instance::Entity",
        from = "Column::InstanceId",
        to = "super::trigger_instance::Column::Id",
        on_delete = "Cascade"
    )]
    TriggerInstance,
}

impl Related<super::trigger_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TriggerInstance.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
