//! Database migrations for the pieces trigger runtime.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_100000_create_trigger_instances;
mod m2025_12_01_100100_create_trigger_states;
mod m2025_12_01_100200_create_trigger_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_100000_create_trigger_instances::Migration),
            Box::new(m2025_12_01_100100_create_trigger_states::Migration),
            Box::new(m2025_12_01_100200_create_trigger_events::Migration),
        ]
    }
}
