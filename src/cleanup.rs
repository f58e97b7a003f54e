//! # Cleanup Orchestrator
//!
//! Top-level entry for logout and dashboard deletion. Every provider the
//! owner holds a credential with gets its own concurrent branch: best-effort
//! provider-side subscription cancellation, then unconditional local deletion
//! of that provider's subscriptions and credential. Branches never abort each
//! other; their results are collected into an explicit per-provider outcome
//! report so partial failure is observable instead of silently discarded.

use std::sync::Arc;

use metrics::counter;
use tracing::{error, info, instrument, warn};

use crate::error::Error;
use crate::providers::{CancelRequest, ProviderRegistry};
use crate::repositories::{CredentialRepository, SubscriptionRepository};

/// Result of one provider's cleanup branch
#[derive(Debug, Clone)]
pub struct CleanupOutcome {
    pub provider_slug: String,
    /// Local subscription rows removed
    pub subscriptions_removed: u64,
    /// Provider-side cancel calls that failed (cancellation is best-effort)
    pub remote_cancel_failures: u64,
    /// Whether the credential row was removed
    pub credential_removed: bool,
    /// Branch-level failure note, if the branch could not run to completion
    pub error: Option<String>,
}

/// Aggregated outcomes of one cleanup run
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl CleanupReport {
    /// True when every branch removed its local state
    pub fn is_fully_clean(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.credential_removed && o.error.is_none())
    }

    /// Total provider-side cancel failures across branches
    pub fn remote_cancel_failures(&self) -> u64 {
        self.outcomes.iter().map(|o| o.remote_cancel_failures).sum()
    }
}

/// Orchestrates owner cleanup across all providers
pub struct CleanupOrchestrator {
    credentials: Arc<CredentialRepository>,
    subscriptions: Arc<SubscriptionRepository>,
    registry: Arc<ProviderRegistry>,
}

impl CleanupOrchestrator {
    /// Create a new cleanup orchestrator
    pub fn new(
        credentials: Arc<CredentialRepository>,
        subscriptions: Arc<SubscriptionRepository>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            credentials,
            subscriptions,
            registry,
        }
    }

    /// Removes every credential and subscription the owner holds, attempting
    /// provider-side cancellation first. One provider's failure never blocks
    /// another's cleanup; local deletion happens regardless.
    #[instrument(skip(self))]
    pub async fn cleanup_owner(
        &self,
        user_id: &str,
        dashboard_id: &str,
    ) -> Result<CleanupReport, Error> {
        // Raw rows: a corrupted ciphertext must not block local deletion
        let credential_rows = self
            .credentials
            .find_models_for_dashboard(user_id, dashboard_id)
            .await?;

        let mut handles = Vec::with_capacity(credential_rows.len());
        for row in credential_rows {
            let credentials = self.credentials.clone();
            let subscriptions = self.subscriptions.clone();
            let registry = self.registry.clone();
            let user_id = user_id.to_string();
            let dashboard_id = dashboard_id.to_string();

            handles.push(tokio::spawn(async move {
                cleanup_provider_branch(credentials, subscriptions, registry, user_id, dashboard_id, row)
                    .await
            }));
        }

        let mut report = CleanupReport::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    error!(error = ?err, "Cleanup branch panicked or was cancelled");
                    report.outcomes.push(CleanupOutcome {
                        provider_slug: "unknown".to_string(),
                        subscriptions_removed: 0,
                        remote_cancel_failures: 0,
                        credential_removed: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        // Final sweep: subscriptions whose credential is already gone
        let orphaned = self
            .subscriptions
            .delete_all_for_owner(user_id, dashboard_id)
            .await?;
        if orphaned > 0 {
            warn!(orphaned, "Removed orphaned subscriptions during cleanup");
        }

        counter!("cleanup_runs_total").increment(1);
        info!(
            providers = report.outcomes.len(),
            remote_cancel_failures = report.remote_cancel_failures(),
            "Owner cleanup completed"
        );

        Ok(report)
    }
}

/// One provider branch: best-effort remote cancels, then unconditional local
/// deletion. Runs to completion and reports, never propagates.
async fn cleanup_provider_branch(
    credentials: Arc<CredentialRepository>,
    subscriptions: Arc<SubscriptionRepository>,
    registry: Arc<ProviderRegistry>,
    user_id: String,
    dashboard_id: String,
    row: crate::models::credential::Model,
) -> CleanupOutcome {
    let provider_slug = row.provider_slug.clone();
    let mut outcome = CleanupOutcome {
        provider_slug: provider_slug.clone(),
        subscriptions_removed: 0,
        remote_cancel_failures: 0,
        credential_removed: false,
        error: None,
    };

    let owned: Vec<_> = match subscriptions.find_by_owner(&user_id, &dashboard_id).await {
        Ok(subs) => subs
            .into_iter()
            .filter(|s| s.provider_slug == provider_slug)
            .collect(),
        Err(err) => {
            outcome.error = Some(err.to_string());
            return outcome;
        }
    };

    // Remote cancels want a usable access secret; if the stored one cannot
    // be decrypted the cancels are skipped and local deletion still runs
    let decrypted = credentials.decrypt_model(&row).ok();
    match (&decrypted, registry.get(&provider_slug)) {
        (Some(credential), Ok(gateway)) => {
            for sub in &owned {
                let cancel = CancelRequest {
                    resource_id: sub.resource_id.clone(),
                    channel_id: sub.channel_id.clone(),
                    installation_id: credential.provider_installation_id.clone(),
                };
                if let Err(err) = gateway.cancel(&credential.access_secret, &cancel).await {
                    outcome.remote_cancel_failures += 1;
                    warn!(
                        provider_slug = %provider_slug,
                        resource_id = %sub.resource_id,
                        error = %err,
                        "Provider-side cancel failed during cleanup"
                    );
                }
            }
        }
        (None, _) => {
            outcome.remote_cancel_failures = owned.len() as u64;
            warn!(
                provider_slug = %provider_slug,
                "Credential undecryptable; skipping remote cancels"
            );
        }
        (_, Err(err)) => {
            outcome.remote_cancel_failures = owned.len() as u64;
            warn!(
                provider_slug = %provider_slug,
                error = %err,
                "No gateway for provider; skipping remote cancels"
            );
        }
    }

    match subscriptions
        .delete_all_for_owner_provider(&user_id, &dashboard_id, &provider_slug)
        .await
    {
        Ok(removed) => outcome.subscriptions_removed = removed,
        Err(err) => outcome.error = Some(err.to_string()),
    }

    match credentials.delete(&user_id, &dashboard_id, &provider_slug).await {
        Ok(()) => outcome.credential_removed = true,
        Err(err) => outcome.error = Some(err.to_string()),
    }

    outcome
}
