//! Migration to create the credentials table.
//!
//! Credentials store one OAuth access/refresh secret pair per
//! (user, dashboard, provider), with both secrets encrypted at rest.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::UserId).text().not_null())
                    .col(ColumnDef::new(Credentials::DashboardId).text().not_null())
                    .col(ColumnDef::new(Credentials::ProviderSlug).text().not_null())
                    .col(
                        ColumnDef::new(Credentials::AccessSecretCiphertext)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::RefreshSecretCiphertext)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::ProviderInstallationId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Credentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One credential per (user, dashboard, provider)
        manager
            .create_index(
                Index::create()
                    .name("idx_credentials_owner_provider")
                    .table(Credentials::Table)
                    .col(Credentials::UserId)
                    .col(Credentials::DashboardId)
                    .col(Credentials::ProviderSlug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Sweep queries scan by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_credentials_expires_at")
                    .table(Credentials::Table)
                    .col(Credentials::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_credentials_owner_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_credentials_expires_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Credentials {
    Table,
    Id,
    UserId,
    DashboardId,
    ProviderSlug,
    AccessSecretCiphertext,
    RefreshSecretCiphertext,
    ExpiresAt,
    ProviderInstallationId,
    CreatedAt,
    UpdatedAt,
}
