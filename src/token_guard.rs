//! # Token Guard
//!
//! Guarantees a valid access secret before any provider call. Each provider
//! carries its own refresh buffer window: the guard refreshes when `now`
//! crosses `expires_at - buffer`, returns the stored secret untouched
//! otherwise. A rejection that proves the refresh secret itself is dead purges
//! the credential and its subscriptions; every other failure leaves local
//! state alone. This is the only component that deletes state based on error
//! classification.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::providers::ProviderRegistry;
use crate::repositories::{CredentialRepository, SubscriptionRepository};

type FlightKey = (String, String, String);

/// A usable access secret plus what it took to obtain it
#[derive(Debug, Clone)]
pub struct AccessLease {
    pub access_secret: String,
    /// Installation scope carried by the credential, when the provider needs one
    pub installation_id: Option<String>,
    /// True when obtaining this lease rotated the credential
    pub refreshed: bool,
}

/// Ensures credentials are valid before use, refreshing them as needed
pub struct TokenGuard {
    credentials: Arc<CredentialRepository>,
    subscriptions: Arc<SubscriptionRepository>,
    registry: Arc<ProviderRegistry>,
    /// Serializes concurrent refreshes of the same credential (single-flight);
    /// the underlying last-write-wins race stays acceptable, this only stops
    /// redundant provider refresh calls
    in_flight: Arc<Mutex<HashMap<FlightKey, Arc<Mutex<()>>>>>,
}

impl TokenGuard {
    /// Create a new token guard
    pub fn new(
        credentials: Arc<CredentialRepository>,
        subscriptions: Arc<SubscriptionRepository>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            credentials,
            subscriptions,
            registry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a valid access secret for the owner/provider pair, refreshing
    /// the stored credential first when it is inside the provider's buffer
    /// window.
    #[instrument(skip(self))]
    pub async fn ensure_valid(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<AccessLease, Error> {
        let key = (
            user_id.to_string(),
            dashboard_id.to_string(),
            provider_slug.to_string(),
        );
        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(key.clone()).or_default().clone()
        };

        let _flight = gate.lock().await;
        let result = self
            .ensure_valid_locked(user_id, dashboard_id, provider_slug)
            .await;
        drop(_flight);

        // Drop the gate entry once no other caller holds it
        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get(&key)
            && Arc::strong_count(entry) <= 2
        {
            in_flight.remove(&key);
        }

        result
    }

    async fn ensure_valid_locked(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<AccessLease, Error> {
        let credential = self
            .credentials
            .find(user_id, dashboard_id, provider_slug)
            .await?
            .ok_or_else(|| Error::credential_not_found(user_id, dashboard_id, provider_slug))?;

        let gateway = self.registry.get(provider_slug)?;
        let refresh_deadline = credential.expires_at - gateway.descriptor().refresh_buffer();

        if Utc::now() < refresh_deadline {
            return Ok(AccessLease {
                access_secret: credential.access_secret,
                installation_id: credential.provider_installation_id,
                refreshed: false,
            });
        }

        debug!(
            provider_slug = %provider_slug,
            expires_at = %credential.expires_at,
            "Access secret inside refresh buffer, refreshing"
        );

        match gateway.refresh(&credential.refresh_secret).await {
            Ok(grant) => {
                let expires_at = grant.expires_at();
                self.credentials
                    .rotate(
                        user_id,
                        dashboard_id,
                        provider_slug,
                        &grant.access_secret,
                        expires_at,
                        grant.refresh_secret.as_deref(),
                    )
                    .await?;

                counter!("token_guard_refresh_success_total").increment(1);
                info!(
                    provider_slug = %provider_slug,
                    expires_at = %expires_at,
                    "Rotated credential after provider refresh"
                );

                Ok(AccessLease {
                    access_secret: grant.access_secret,
                    installation_id: credential.provider_installation_id,
                    refreshed: true,
                })
            }
            Err(err) if err.is_permanent_auth_failure() => {
                warn!(
                    provider_slug = %provider_slug,
                    error = %err,
                    "Refresh secret rejected; purging credential and its subscriptions"
                );

                self.credentials
                    .delete(user_id, dashboard_id, provider_slug)
                    .await?;
                self.subscriptions
                    .delete_all_for_owner_provider(user_id, dashboard_id, provider_slug)
                    .await?;

                counter!("token_guard_refresh_permanent_failure_total").increment(1);

                Err(Error::ReauthenticationRequired {
                    provider_slug: provider_slug.to_string(),
                })
            }
            Err(err) => {
                counter!("token_guard_refresh_transient_failure_total").increment(1);
                warn!(
                    provider_slug = %provider_slug,
                    error = %err,
                    "Transient refresh failure; local state untouched"
                );

                Err(Error::ProviderTransient {
                    provider_slug: provider_slug.to_string(),
                    detail: err.to_string(),
                })
            }
        }
    }
}
