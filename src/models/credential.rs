//! Credential entity model
//!
//! This module contains the SeaORM entity model for the credentials table,
//! which stores one OAuth secret pair per (user, dashboard, provider). The
//! access and refresh secrets are only ever persisted in their encrypted
//! base64 form; decryption happens transiently in the repository layer.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Credential entity holding encrypted OAuth secrets for one owner/provider pair
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    /// Surrogate identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Stable user identifier extracted at sign-in
    pub user_id: String,

    /// Dashboard the credential is scoped to
    pub dashboard_id: String,

    /// Provider this credential authorizes
    pub provider_slug: String,

    /// Encrypted access secret (base64 IV || AES-256-CBC)
    pub access_secret_ciphertext: String,

    /// Encrypted refresh secret (base64 IV || AES-256-CBC)
    pub refresh_secret_ciphertext: String,

    /// Access secret expiry reported by the provider
    pub expires_at: DateTimeWithTimeZone,

    /// Provider-side installation scope (e.g. an installed-app id), when required
    pub provider_installation_id: Option<String>,

    /// Timestamp when the credential was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the credential was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
