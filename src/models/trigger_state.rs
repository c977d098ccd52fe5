//! TriggerState entity model
//!
//! Key/value state a trigger keeps between runs (polling cursors, vendor
//! webhook ids). Unique on `(instance_id, key)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub instance_id: Uuid,

    pub key: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub value: JsonValue,

    pub updated_at: DateTimeWithTimeZone,
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
