//! # Error Handling
//!
//! This module provides the unified error taxonomy for the sync core. Provider
//! gateways and the crypto layer carry their own structured error types and
//! convert inward; lifecycle components surface this enum unchanged, and only
//! the token guard deletes local state based on error classification.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::providers::registry::RegistryError;

/// Unified error type for credential and subscription lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input, rejected before any network call
    #[error("validation failed: {0}")]
    Validation(String),

    /// No credential stored for the requested (user, dashboard, provider)
    #[error("no credential for user '{user_id}' dashboard '{dashboard_id}' provider '{provider_slug}'")]
    CredentialNotFound {
        user_id: String,
        dashboard_id: String,
        provider_slug: String,
    },

    /// The provider rejected the refresh secret itself; the credential and its
    /// subscriptions have been purged and the user must sign in again
    #[error("provider '{provider_slug}' rejected the refresh secret; re-authentication required")]
    ReauthenticationRequired { provider_slug: String },

    /// Network, timeout, or server-side provider failure; retry-safe and never
    /// grounds for purging local state
    #[error("transient provider failure for '{provider_slug}': {detail}")]
    ProviderTransient {
        provider_slug: String,
        detail: String,
    },

    /// The provider rejected a subscribe or renew call
    #[error("provider '{provider_slug}' rejected subscription call: {detail}")]
    Subscription {
        provider_slug: String,
        detail: String,
    },

    /// Authenticated decryption failed; fatal for the affected record
    #[error("secret decryption failed: {0}")]
    Encryption(#[from] CryptoError),

    /// Underlying persistence failure
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl Error {
    /// Build a `CredentialNotFound` for the given owner/provider triple
    pub fn credential_not_found(user_id: &str, dashboard_id: &str, provider_slug: &str) -> Self {
        Error::CredentialNotFound {
            user_id: user_id.to_string(),
            dashboard_id: dashboard_id.to_string(),
            provider_slug: provider_slug.to_string(),
        }
    }

    /// True when the caller may safely retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ProviderTransient { .. } | Error::Database(_))
    }
}
