//! Migration to create the trigger_events table.
//!
//! Events emitted by trigger runs, handed to the workflow engine in creation order.

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
                    .table(TriggerEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerEvents::InstanceId).uuid().not_null())
                    .col(ColumnDef::new(TriggerEvents::Source).text().not_null())
                    .col(ColumnDef::new(TriggerEvents::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerEvents::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_events_instance_id")
                            .from(TriggerEvents::Table, TriggerEvents::InstanceId)
                            .to(TriggerInstances::Table, TriggerInstances::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_events_instance_sequence")
                    .table(TriggerEvents::Table)
                    .col(TriggerEvents::InstanceId)
                    .col(TriggerEvents::Sequence)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_events_instance_sequence")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerEvents {
    Table,
    Id,
    InstanceId,
    Source,
    Payload,
    Sequence,
    CreatedAt,
}
