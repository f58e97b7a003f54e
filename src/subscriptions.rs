//! # Subscription Coordinator
//!
//! Creates, renews, and retires provider push subscriptions, enforcing the
//! at-most-one-active rule per (user, dashboard, provider, target).
//! Retirement is best-effort on the provider side and unconditional locally:
//! a provider that refuses to cancel must not keep us from dropping our own
//! record, or retirement could never converge. Creation failures, by
//! contrast, surface to the caller as subscription errors.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::correlation::CorrelationSigner;
use crate::error::Error;
use crate::models::subscription;
use crate::providers::{CancelRequest, ProviderGateway, ProviderRegistry, SubscribeRequest};
use crate::repositories::{NewSubscription, SubscriptionRepository};
use crate::token_guard::{AccessLease, TokenGuard};

/// Coordinates subscription lifecycle across the provider gateways
pub struct SubscriptionCoordinator {
    guard: Arc<TokenGuard>,
    registry: Arc<ProviderRegistry>,
    subscriptions: Arc<SubscriptionRepository>,
    correlation: Arc<CorrelationSigner>,
    /// Public base URL; the provider slug is appended per callback
    callback_base_url: String,
    /// Lifetime requested for new registrations, clamped per provider
    requested_lifetime_seconds: u64,
}

impl SubscriptionCoordinator {
    /// Create a new coordinator
    pub fn new(
        guard: Arc<TokenGuard>,
        registry: Arc<ProviderRegistry>,
        subscriptions: Arc<SubscriptionRepository>,
        correlation: Arc<CorrelationSigner>,
        callback_base_url: String,
        requested_lifetime_seconds: u64,
    ) -> Self {
        Self {
            guard,
            registry,
            subscriptions,
            correlation,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
            requested_lifetime_seconds,
        }
    }

    /// Creates a push subscription for the target, retiring any existing one
    /// for the same (user, dashboard, provider, target) first.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
        target_id: &str,
    ) -> Result<subscription::Model, Error> {
        validate_identifier("user_id", user_id)?;
        validate_identifier("dashboard_id", dashboard_id)?;
        validate_identifier("provider_slug", provider_slug)?;
        validate_identifier("target_id", target_id)?;

        let gateway = self.registry.get(provider_slug)?;
        let lease = self
            .guard
            .ensure_valid(user_id, dashboard_id, provider_slug)
            .await?;

        let existing = self
            .subscriptions
            .find_by_owner(user_id, dashboard_id)
            .await?;

        // At most one active registration per target: retire duplicates first
        for sub in existing
            .iter()
            .filter(|s| s.provider_slug == provider_slug && s.target_id == target_id)
        {
            self.retire(gateway.as_ref(), &lease, sub).await?;
        }

        let created = self
            .create_remote(gateway.as_ref(), &lease, user_id, dashboard_id, target_id)
            .await?;

        // Some providers invalidate registrations on token rotation; when the
        // lease came from a refresh, recreate the owner's other registrations
        // for this provider too.
        if lease.refreshed {
            let stale: Vec<_> = existing
                .into_iter()
                .filter(|s| s.provider_slug == provider_slug && s.target_id != target_id)
                .collect();
            if !stale.is_empty() {
                debug!(
                    provider_slug = %provider_slug,
                    count = stale.len(),
                    "Defensively renewing sibling subscriptions after credential refresh"
                );
                for sub in stale {
                    self.retire(gateway.as_ref(), &lease, &sub).await?;
                    self.create_remote(
                        gateway.as_ref(),
                        &lease,
                        user_id,
                        dashboard_id,
                        &sub.target_id,
                    )
                    .await?;
                }
            }
        }

        counter!("subscription_create_total").increment(1);
        Ok(created)
    }

    /// Retires and recreates every active subscription the owner holds with
    /// the provider, using a fresh access lease.
    #[instrument(skip(self))]
    pub async fn renew(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
    ) -> Result<Vec<subscription::Model>, Error> {
        let gateway = self.registry.get(provider_slug)?;
        let lease = self
            .guard
            .ensure_valid(user_id, dashboard_id, provider_slug)
            .await?;

        let current: Vec<_> = self
            .subscriptions
            .find_by_owner(user_id, dashboard_id)
            .await?
            .into_iter()
            .filter(|s| s.provider_slug == provider_slug)
            .collect();

        let mut renewed = Vec::with_capacity(current.len());
        for sub in current {
            self.retire(gateway.as_ref(), &lease, &sub).await?;
            let fresh = self
                .create_remote(
                    gateway.as_ref(),
                    &lease,
                    user_id,
                    dashboard_id,
                    &sub.target_id,
                )
                .await?;
            renewed.push(fresh);
        }

        counter!("subscription_renew_total").increment(renewed.len() as u64);
        info!(
            provider_slug = %provider_slug,
            renewed = renewed.len(),
            "Renewed subscriptions"
        );
        Ok(renewed)
    }

    /// Best-effort provider-side cancel followed by unconditional local delete
    async fn retire(
        &self,
        gateway: &dyn ProviderGateway,
        lease: &AccessLease,
        sub: &subscription::Model,
    ) -> Result<(), Error> {
        let cancel = CancelRequest {
            resource_id: sub.resource_id.clone(),
            channel_id: sub.channel_id.clone(),
            installation_id: lease.installation_id.clone(),
        };

        if let Err(err) = gateway.cancel(&lease.access_secret, &cancel).await {
            counter!("subscription_remote_cancel_failure_total").increment(1);
            warn!(
                provider_slug = %sub.provider_slug,
                resource_id = %sub.resource_id,
                error = %err,
                "Provider-side cancel failed; deleting local record anyway"
            );
        }

        self.subscriptions
            .delete_by_resource_id(&sub.resource_id)
            .await
    }

    async fn create_remote(
        &self,
        gateway: &dyn ProviderGateway,
        lease: &AccessLease,
        user_id: &str,
        dashboard_id: &str,
        target_id: &str,
    ) -> Result<subscription::Model, Error> {
        let descriptor = gateway.descriptor();
        let request = SubscribeRequest {
            target_id: target_id.to_string(),
            callback_url: format!("{}/{}", self.callback_base_url, descriptor.slug),
            correlation_token: self.correlation.issue(user_id, dashboard_id),
            lifetime: descriptor.clamp_lifetime(self.requested_lifetime_seconds),
            installation_id: lease.installation_id.clone(),
        };

        let remote = gateway
            .subscribe(&lease.access_secret, &request)
            .await
            .map_err(|err| {
                counter!("subscription_create_failure_total").increment(1);
                Error::Subscription {
                    provider_slug: descriptor.slug.clone(),
                    detail: err.to_string(),
                }
            })?;

        self.subscriptions
            .create(NewSubscription {
                resource_id: remote.resource_id,
                user_id: user_id.to_string(),
                dashboard_id: dashboard_id.to_string(),
                provider_slug: descriptor.slug.clone(),
                target_id: target_id.to_string(),
                expires_at: remote.expires_at,
                channel_id: remote.channel_id,
            })
            .await
    }
}

fn validate_identifier(name: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{name} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(validate_identifier("user_id", "u1").is_ok());
        assert!(validate_identifier("user_id", "").is_err());
        assert!(validate_identifier("target_id", "   ").is_err());
    }
}
