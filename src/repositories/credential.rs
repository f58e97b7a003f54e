//! Credential repository for database operations
//!
//! This module provides the CredentialRepository struct which encapsulates
//! SeaORM operations for the credentials table. Every write encrypts both
//! secrets with a fresh random IV, so rotating a credential never produces a
//! correlatable ciphertext; every read decrypts before returning. A
//! decryption failure is surfaced as a fatal encryption error, never replaced
//! with a substitute value.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_secret, encrypt_secret};
use crate::error::Error;
use crate::models::credential::{self, Entity as CredentialEntity};

/// Decrypted credential, held only transiently in memory
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: String,
    pub dashboard_id: String,
    pub provider_slug: String,
    pub access_secret: String,
    pub refresh_secret: String,
    pub expires_at: DateTime<Utc>,
    pub provider_installation_id: Option<String>,
}

/// Input for persisting a credential after a successful code exchange
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub user_id: String,
    pub dashboard_id: String,
    pub provider_slug: String,
    pub access_secret: String,
    pub refresh_secret: String,
    pub expires_at: DateTime<Utc>,
    pub provider_installation_id: Option<String>,
}

/// Repository for credential database operations
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    /// Crypto key for secret encryption
    pub crypto_key: CryptoKey,
}

impl CredentialRepository {
    /// Creates a new CredentialRepository instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Persists a credential, replacing any existing record for the same
    /// (user, dashboard, provider). Both secrets are re-encrypted with fresh
    /// IVs on every call.
    pub async fn save(&self, new: NewCredential) -> Result<credential::Model, Error> {
        let access_ciphertext = encrypt_secret(&self.crypto_key, &new.access_secret)?;
        let refresh_ciphertext = encrypt_secret(&self.crypto_key, &new.refresh_secret)?;
        let now = Utc::now();

        let existing = self
            .find_model(&new.user_id, &new.dashboard_id, &new.provider_slug)
            .await?;

        if let Some(existing) = existing {
            let id = existing.id;
            let mut model: credential::ActiveModel = existing.into();
            model.access_secret_ciphertext = Set(access_ciphertext);
            model.refresh_secret_ciphertext = Set(refresh_ciphertext);
            model.expires_at = Set(new.expires_at.into());
            model.provider_installation_id = Set(new.provider_installation_id);
            model.updated_at = Set(now.into());
            model.update(&*self.db).await?;

            return self.fetch_by_id(id).await;
        }

        let id = Uuid::new_v4();
        let model = credential::ActiveModel {
            id: Set(id),
            user_id: Set(new.user_id),
            dashboard_id: Set(new.dashboard_id),
            provider_slug: Set(new.provider_slug),
            access_secret_ciphertext: Set(access_ciphertext),
            refresh_secret_ciphertext: Set(refresh_ciphertext),
            expires_at: Set(new.expires_at.into()),
            provider_installation_id: Set(new.provider_installation_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        model.insert(&*self.db).await?;

        // For SQLite, query the record directly since we already know the ID
        self.fetch_by_id(id).await
    }

    /// Finds and decrypts the credential for an owner/provider pair
    pub async fn find(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<Option<Credential>, Error> {
        let model = self.find_model(user_id, dashboard_id, provider_slug).await?;
        model.map(|m| self.decrypt_model(&m)).transpose()
    }

    /// Lists and decrypts every credential held for a dashboard
    pub async fn find_all_for_dashboard(
        &self,
        user_id: &str,
        dashboard_id: &str,
    ) -> Result<Vec<Credential>, Error> {
        self.find_models_for_dashboard(user_id, dashboard_id)
            .await?
            .iter()
            .map(|m| self.decrypt_model(m))
            .collect()
    }

    /// Lists raw (still-encrypted) credential rows for a dashboard. Used by
    /// cleanup so a corrupted ciphertext cannot block local deletion.
    pub async fn find_models_for_dashboard(
        &self,
        user_id: &str,
        dashboard_id: &str,
    ) -> Result<Vec<credential::Model>, Error> {
        Ok(CredentialEntity::find()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::DashboardId.eq(dashboard_id))
            .order_by_asc(credential::Column::ProviderSlug)
            .all(&*self.db)
            .await?)
    }

    /// Deletes the credential for an owner/provider pair; deleting a missing
    /// record is not an error
    pub async fn delete(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<(), Error> {
        CredentialEntity::delete_many()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::DashboardId.eq(dashboard_id))
            .filter(credential::Column::ProviderSlug.eq(provider_slug))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Replaces the access secret and expiry in place, and the refresh secret
    /// when the provider reissued one. Fresh IVs on every rotation.
    pub async fn rotate(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
        new_access_secret: &str,
        new_expires_at: DateTime<Utc>,
        new_refresh_secret: Option<&str>,
    ) -> Result<credential::Model, Error> {
        let existing = self
            .find_model(user_id, dashboard_id, provider_slug)
            .await?
            .ok_or_else(|| Error::credential_not_found(user_id, dashboard_id, provider_slug))?;

        let id = existing.id;
        let mut model: credential::ActiveModel = existing.into();
        model.access_secret_ciphertext =
            Set(encrypt_secret(&self.crypto_key, new_access_secret)?);
        if let Some(refresh) = new_refresh_secret {
            model.refresh_secret_ciphertext = Set(encrypt_secret(&self.crypto_key, refresh)?);
        }
        model.expires_at = Set(new_expires_at.into());
        model.updated_at = Set(Utc::now().into());
        model.update(&*self.db).await?;

        self.fetch_by_id(id).await
    }

    /// Decrypts a raw credential row into its transient domain form
    pub fn decrypt_model(&self, model: &credential::Model) -> Result<Credential, Error> {
        let access_secret = decrypt_secret(&self.crypto_key, &model.access_secret_ciphertext)
            .inspect_err(|_| {
                tracing::error!(
                    user_id = %model.user_id,
                    dashboard_id = %model.dashboard_id,
                    provider_slug = %model.provider_slug,
                    "Access secret decryption failed"
                );
            })?;
        let refresh_secret = decrypt_secret(&self.crypto_key, &model.refresh_secret_ciphertext)
            .inspect_err(|_| {
                tracing::error!(
                    user_id = %model.user_id,
                    dashboard_id = %model.dashboard_id,
                    provider_slug = %model.provider_slug,
                    "Refresh secret decryption failed"
                );
            })?;

        Ok(Credential {
            user_id: model.user_id.clone(),
            dashboard_id: model.dashboard_id.clone(),
            provider_slug: model.provider_slug.clone(),
            access_secret,
            refresh_secret,
            expires_at: model.expires_at.with_timezone(&Utc),
            provider_installation_id: model.provider_installation_id.clone(),
        })
    }

    async fn find_model(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<Option<credential::Model>, Error> {
        Ok(CredentialEntity::find()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::DashboardId.eq(dashboard_id))
            .filter(credential::Column::ProviderSlug.eq(provider_slug))
            .one(&*self.db)
            .await?)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<credential::Model, Error> {
        CredentialEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                Error::Database(sea_orm::DbErr::RecordNotFound(format!(
                    "credential '{}' not persisted",
                    id
                )))
            })
    }
}
