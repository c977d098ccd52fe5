//! TriggerInstance entity model
//!
//! One enabled (or formerly enabled) piece trigger, with the auth and props it
//! was enabled with and its polling schedule.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const STATUS_ENABLED: &str = "enabled";
pub const STATUS_DISABLED: &str = "disabled";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub piece_name: String,

    pub trigger_name: String,

    /// `polling` or `webhook`
    pub strategy: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub props: JsonValue,

    /// Serialized `AuthValue`
    #[sea_orm(column_type = "JsonBinary")]
    pub auth: JsonValue,

    /// `enabled` or `disabled`
    pub status: String,

    pub poll_interval_seconds: i64,

    /// Due time of the next scheduled poll; null for webhook triggers
    pub next_poll_at: Option<DateTimeWithTimeZone>,

    pub last_polled_at: Option<DateTimeWithTimeZone>,

    /// Summary of the last failed run, cleared on success
    #[sea_orm(column_type = "JsonBinary")]
    pub last_error: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trigger_state::Entity")]
    TriggerState,
    #[sea_orm(has_many = "super::trigger_event::Entity")]
    TriggerEvent,
}

impl Related<super::trigger_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TriggerState.def()
    }
}

impl Related<super::trigger_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TriggerEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}
