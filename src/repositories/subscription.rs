//! Subscription repository for database operations
//!
//! Plain keyed store over the subscriptions table. The coordinator, not this
//! repository, is responsible for the at-most-one-active-per-target rule.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::error::Error;
use crate::models::subscription::{self, Entity as SubscriptionEntity};

/// Input for persisting a subscription after a successful provider subscribe call
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub resource_id: String,
    pub user_id: String,
    pub dashboard_id: String,
    pub provider_slug: String,
    pub target_id: String,
    pub expires_at: DateTime<Utc>,
    pub channel_id: Option<String>,
}

/// Partial update for a subscription row
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub expires_at: Option<DateTime<Utc>>,
    pub channel_id: Option<String>,
}

/// Repository for subscription database operations
#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl SubscriptionRepository {
    /// Creates a new SubscriptionRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a new subscription record
    pub async fn create(&self, new: NewSubscription) -> Result<subscription::Model, Error> {
        let now = Utc::now();
        let resource_id = new.resource_id.clone();

        let model = subscription::ActiveModel {
            resource_id: Set(new.resource_id),
            user_id: Set(new.user_id),
            dashboard_id: Set(new.dashboard_id),
            provider_slug: Set(new.provider_slug),
            target_id: Set(new.target_id),
            expires_at: Set(new.expires_at.into()),
            channel_id: Set(new.channel_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        model.insert(&*self.db).await?;

        // For SQLite, query the record directly since we already know the key
        self.fetch(&resource_id).await
    }

    /// Finds a subscription by its provider-assigned resource id
    pub async fn find_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Option<subscription::Model>, Error> {
        Ok(SubscriptionEntity::find_by_id(resource_id.to_string())
            .one(&*self.db)
            .await?)
    }

    /// Lists every subscription held by an owner, ordered for stable iteration
    pub async fn find_by_owner(
        &self,
        user_id: &str,
        dashboard_id: &str,
    ) -> Result<Vec<subscription::Model>, Error> {
        Ok(SubscriptionEntity::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::DashboardId.eq(dashboard_id))
            .order_by_asc(subscription::Column::ProviderSlug)
            .order_by_asc(subscription::Column::ResourceId)
            .all(&*self.db)
            .await?)
    }

    /// Lists subscriptions whose expiry falls within the given window from now
    pub async fn find_expiring_within(
        &self,
        window: Duration,
    ) -> Result<Vec<subscription::Model>, Error> {
        let cutoff: sea_orm::prelude::DateTimeWithTimeZone = (Utc::now() + window).into();

        Ok(SubscriptionEntity::find()
            .filter(subscription::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(subscription::Column::ExpiresAt)
            .all(&*self.db)
            .await?)
    }

    /// Deletes by resource id; deleting a missing record is not an error
    pub async fn delete_by_resource_id(&self, resource_id: &str) -> Result<(), Error> {
        SubscriptionEntity::delete_many()
            .filter(subscription::Column::ResourceId.eq(resource_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Deletes every subscription held by an owner
    pub async fn delete_all_for_owner(
        &self,
        user_id: &str,
        dashboard_id: &str,
    ) -> Result<u64, Error> {
        let result = SubscriptionEntity::delete_many()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::DashboardId.eq(dashboard_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Deletes an owner's subscriptions for a single provider; used when a
    /// credential is invalidated and its registrations go with it
    pub async fn delete_all_for_owner_provider(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<u64, Error> {
        let result = SubscriptionEntity::delete_many()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::DashboardId.eq(dashboard_id))
            .filter(subscription::Column::ProviderSlug.eq(provider_slug))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Applies a partial update to a subscription row
    pub async fn update(
        &self,
        resource_id: &str,
        patch: SubscriptionPatch,
    ) -> Result<subscription::Model, Error> {
        let existing = self.fetch(resource_id).await?;

        let mut model: subscription::ActiveModel = existing.into();
        if let Some(expires_at) = patch.expires_at {
            model.expires_at = Set(expires_at.into());
        }
        if let Some(channel_id) = patch.channel_id {
            model.channel_id = Set(Some(channel_id));
        }
        model.updated_at = Set(Utc::now().into());
        model.update(&*self.db).await?;

        self.fetch(resource_id).await
    }

    async fn fetch(&self, resource_id: &str) -> Result<subscription::Model, Error> {
        SubscriptionEntity::find_by_id(resource_id.to_string())
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                Error::Database(sea_orm::DbErr::RecordNotFound(format!(
                    "subscription '{}' not found",
                    resource_id
                )))
            })
    }
}
