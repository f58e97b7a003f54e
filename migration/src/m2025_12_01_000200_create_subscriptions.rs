//! Migration to create the subscriptions table.
//!
//! Subscriptions track provider-side push registrations, keyed by the
//! provider-assigned resource id.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::ResourceId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscriptions::UserId).text().not_null())
                    .col(ColumnDef::new(Subscriptions::DashboardId).text().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::ProviderSlug)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Subscriptions::TargetId).text().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Subscriptions::ChannelId).text().null())
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Owner-scoped lookups (routing, renewal, cleanup)
        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_owner")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .col(Subscriptions::DashboardId)
                    .to_owned(),
            )
            .await?;

        // Renewal sweep scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_expires_at")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_subscriptions_owner").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_subscriptions_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    ResourceId,
    UserId,
    DashboardId,
    ProviderSlug,
    TargetId,
    ExpiresAt,
    ChannelId,
    CreatedAt,
    UpdatedAt,
}
