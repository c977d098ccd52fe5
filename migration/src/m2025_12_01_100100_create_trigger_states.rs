//! Migration to create the trigger_states table.
//!
//! Key/value store scoped to a trigger instance. Polling triggers keep their
//! dedupe cursor here; webhook triggers keep vendor subscription ids.

use sea_orm_migration::prelude::*;

use crate::m2025_12_01_100000_create_trigger_instances::TriggerInstances;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerStates::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerStates::InstanceId).uuid().not_null())
                    .col(ColumnDef::new(TriggerStates::Key).text().not_null())
                    .col(ColumnDef::new(TriggerStates::Value).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_states_instance_id")
                            .from(TriggerStates::Table, TriggerStates::InstanceId)
                            .to(TriggerInstances::Table, TriggerInstances::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_trigger_states_instance_key")
                    .table(TriggerStates::Table)
                    .col(TriggerStates::InstanceId)
                    .col(TriggerStates::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_trigger_states_instance_key").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerStates {
    Table,
    Id,
    InstanceId,
    Key,
    Value,
    UpdatedAt,
}
