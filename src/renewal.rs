//! # Renewal Service
//!
//! Background task that periodically scans subscriptions nearing expiry and
//! renews them ahead of each provider's hard ceiling. Renewal goes through
//! the coordinator, so each pass also refreshes the owner's credential when
//! it is inside its buffer window.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use metrics::{counter, histogram};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::RenewalConfig;
use crate::error::Error;
use crate::repositories::SubscriptionRepository;
use crate::subscriptions::SubscriptionCoordinator;

/// Background subscription renewal service
pub struct RenewalService {
    config: RenewalConfig,
    subscriptions: Arc<SubscriptionRepository>,
    coordinator: Arc<SubscriptionCoordinator>,
}

#[derive(Debug, Default)]
struct SweepStats {
    subscriptions_due: u64,
    owners_renewed: u64,
    owners_failed: u64,
}

impl RenewalService {
    /// Create a new renewal service instance
    pub fn new(
        config: RenewalConfig,
        subscriptions: Arc<SubscriptionRepository>,
        coordinator: Arc<SubscriptionCoordinator>,
    ) -> Self {
        Self {
            config,
            subscriptions,
            coordinator,
        }
    }

    /// Run the renewal loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        info!("Starting subscription renewal service");
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Subscription renewal service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Subscription renewal tick failed");
                    }
                    let elapsed = tick_started.elapsed();
                    histogram!("subscription_renewal_tick_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Subscription renewal service stopped");
        Ok(())
    }

    /// Execute one sweep: group due subscriptions by owner/provider and renew
    /// each group concurrently, bounded by the configured concurrency. One
    /// owner's failure never aborts another's renewal.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<(), Error> {
        let mut stats = SweepStats::default();
        let window = Duration::seconds(self.config.lead_time_seconds as i64);

        let due = self.subscriptions.find_expiring_within(window).await?;
        stats.subscriptions_due = due.len() as u64;

        let owners: BTreeSet<(String, String, String)> = due
            .into_iter()
            .map(|s| (s.user_id, s.dashboard_id, s.provider_slug))
            .collect();

        info!(
            subscriptions_due = stats.subscriptions_due,
            owner_groups = owners.len(),
            lead_time_seconds = self.config.lead_time_seconds,
            "Found subscriptions due for renewal"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut handles = Vec::new();

        for (user_id, dashboard_id, provider_slug) in owners {
            let semaphore = semaphore.clone();
            let coordinator = self.coordinator.clone();
            let jitter = self.compute_jitter();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                if jitter > 0 {
                    sleep(TokioDuration::from_secs(jitter)).await;
                }
                coordinator
                    .renew(&user_id, &dashboard_id, &provider_slug)
                    .await
                    .map(|renewed| (provider_slug, renewed.len()))
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok((provider_slug, count))) => {
                    stats.owners_renewed += 1;
                    counter!("subscription_renewal_success_total", "provider_slug" => provider_slug)
                        .increment(count as u64);
                }
                Ok(Err(err)) => {
                    stats.owners_failed += 1;
                    counter!("subscription_renewal_failure_total").increment(1);
                    error!(error = ?err, "Owner renewal failed");
                }
                Err(err) => {
                    stats.owners_failed += 1;
                    error!(error = ?err, "Renewal task panicked or was cancelled");
                }
            }
        }

        debug!(
            subscriptions_due = stats.subscriptions_due,
            owners_renewed = stats.owners_renewed,
            owners_failed = stats.owners_failed,
            "Subscription renewal tick completed"
        );

        Ok(())
    }

    /// Compute jitter delay to avoid thundering herd against provider APIs
    fn compute_jitter(&self) -> u64 {
        if self.config.jitter_factor <= 0.0 {
            return 0;
        }

        let max_delay_seconds =
            (self.config.lead_time_seconds as f64 * self.config.jitter_factor) as u64;
        if max_delay_seconds == 0 {
            return 0;
        }

        let mut rng = rand::thread_rng();
        rng.gen_range(0..=max_delay_seconds)
    }
}
