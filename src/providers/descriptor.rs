//! Provider descriptor types
//!
//! Static per-provider configuration supplied at startup and immutable
//! afterwards: endpoints, scopes, the subscription lifetime ceiling, and the
//! refresh buffer window.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::config::ProviderSettings;

/// Immutable description of one provider integration
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Unique identifier for the provider
    pub slug: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// OAuth token endpoint base URL
    pub token_base: String,
    /// REST API base URL
    pub api_base: String,
    /// OAuth scopes requested at authorization time
    pub scopes: Vec<String>,
    /// Hard ceiling the provider imposes on subscription lifetime, in seconds
    pub max_subscription_lifetime_seconds: u64,
    /// Lead time before access-secret expiry at which a refresh is forced, in seconds
    pub refresh_buffer_seconds: u64,
    /// Bounded timeout for every outbound call
    pub http_timeout: StdDuration,
}

impl ProviderDescriptor {
    /// Builds a descriptor from typed settings
    pub fn from_settings(slug: &str, settings: &ProviderSettings, http_timeout_ms: u64) -> Self {
        Self {
            slug: slug.to_string(),
            client_id: settings.client_id.clone().unwrap_or_default(),
            client_secret: settings.client_secret.clone().unwrap_or_default(),
            token_base: settings.token_base.trim_end_matches('/').to_string(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            scopes: settings.scopes.clone(),
            max_subscription_lifetime_seconds: settings.max_subscription_lifetime_seconds,
            refresh_buffer_seconds: settings.refresh_buffer_seconds,
            http_timeout: StdDuration::from_millis(http_timeout_ms),
        }
    }

    /// The refresh buffer as a chrono duration
    pub fn refresh_buffer(&self) -> Duration {
        Duration::seconds(self.refresh_buffer_seconds as i64)
    }

    /// Clamps a requested subscription lifetime to this provider's ceiling
    pub fn clamp_lifetime(&self, requested_seconds: u64) -> Duration {
        Duration::seconds(requested_seconds.min(self.max_subscription_lifetime_seconds) as i64)
    }
}
