//! Migration to create the trigger_instances table.
//!
//! Each row is one enabled (or formerly enabled) piece trigger together with
//! the auth and property values it was enabled with and its polling cadence.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerInstances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerInstances::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerInstances::PieceName).text().not_null())
                    .col(
                        ColumnDef::new(TriggerInstances::TriggerName)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TriggerInstances::Strategy).text().not_null())
                    .col(ColumnDef::new(TriggerInstances::Props).json_binary().not_null())
                    .col(ColumnDef::new(TriggerInstances::Auth).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerInstances::Status)
                            .text()
                            .not_null()
                            .default("enabled"),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::PollIntervalSeconds)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::NextPollAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::LastPolledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::LastError)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TriggerInstances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Scheduler scans enabled polling instances ordered by due time
        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_instances_status_strategy_next_poll")
                    .table(TriggerInstances::Table)
                    .col(TriggerInstances::Status)
                    .col(TriggerInstances::Strategy)
                    .col(TriggerInstances::NextPollAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_instances_status_strategy_next_poll")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerInstances::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum TriggerInstances {
    Table,
    Id,
    PieceName,
    TriggerName,
    Strategy,
    Props,
    Auth,
    Status,
    PollIntervalSeconds,
    NextPollAt,
    LastPolledAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
