//! Database migrations for the Homeview sync core.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000100_create_credentials;
mod m2025_12_01_000200_create_subscriptions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000100_create_credentials::Migration),
            Box::new(m2025_12_01_000200_create_subscriptions::Migration),
        ]
    }
}
