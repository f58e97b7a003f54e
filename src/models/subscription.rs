//! Subscription entity model
//!
//! SeaORM entity for the subscriptions table. Each row tracks one
//! provider-side push registration, keyed by the provider-assigned resource
//! id that inbound notifications reference.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Subscription entity representing a provider-side push registration
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    /// Provider-assigned resource identifier (primary key, globally unique)
    #[sea_orm(primary_key, auto_increment = false)]
    pub resource_id: String,

    /// Owning user
    pub user_id: String,

    /// Owning dashboard
    pub dashboard_id: String,

    /// Provider that issued the registration
    pub provider_slug: String,

    /// Watched calendar or device identifier
    pub target_id: String,

    /// Hard expiry; renewal recreates the registration before this point
    pub expires_at: DateTimeWithTimeZone,

    /// Secondary correlation id some providers assign alongside the resource id
    pub channel_id: Option<String>,

    /// Timestamp when the subscription was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the subscription was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
