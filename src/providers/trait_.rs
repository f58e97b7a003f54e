//! Provider gateway trait definition
//!
//! Defines the capability interface every provider integration implements.
//! The three providers expose incompatible wire protocols; this trait is the
//! seam where they converge, so the token guard and the subscription
//! coordinator never see provider-specific shapes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::providers::descriptor::ProviderDescriptor;

/// OAuth error codes that mean the refresh secret itself is dead and a new
/// sign-in is the only way forward.
const PERMANENT_OAUTH_ERRORS: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "unauthorized_client",
    "access_denied",
    "unsupported_grant_type",
];

/// Gateway-level error for outbound provider calls
#[derive(Debug, Error)]
pub enum ProviderApiError {
    /// Non-success HTTP response from the provider
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Network or connectivity error, including bounded-timeout expiry
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Response arrived but could not be interpreted
    #[error("malformed provider response: {0}")]
    Malformed(String),
    /// The request could not be built from local state
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderApiError {
    /// True when the failure proves the refresh secret is invalid. Timeouts
    /// and server-side failures never qualify.
    pub fn is_permanent_auth_failure(&self) -> bool {
        match self {
            ProviderApiError::Http { status, body } => {
                if *status == 401 {
                    return true;
                }
                if !(400..500).contains(status) || *status == 429 {
                    return false;
                }
                let lower = body.to_lowercase();
                PERMANENT_OAUTH_ERRORS.iter().any(|code| lower.contains(code))
            }
            _ => false,
        }
    }

    /// True when retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderApiError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderApiError::Network(_) => true,
            ProviderApiError::Malformed(_) => true,
            ProviderApiError::InvalidRequest(_) => false,
        }
    }
}

/// Secrets returned by a code exchange or refresh call
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_secret: String,
    /// Present only when the provider reissued the refresh secret
    pub refresh_secret: Option<String>,
    /// Access secret validity in seconds
    pub expires_in: i64,
}

impl TokenGrant {
    /// Absolute expiry of the granted access secret
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.expires_in)
    }
}

/// Parameters for a provider subscribe call
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    /// Calendar or device identifier to watch
    pub target_id: String,
    /// Publicly reachable callback the provider will deliver to
    pub callback_url: String,
    /// Opaque owner token round-tripped back through the provider
    pub correlation_token: String,
    /// Requested lifetime, already clamped to the provider ceiling
    pub lifetime: Duration,
    /// Provider-side installation scope, when the provider requires one
    pub installation_id: Option<String>,
}

/// Provider-assigned registration returned by a subscribe call
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    /// Globally unique resource id referenced by inbound notifications
    pub resource_id: String,
    /// Secondary correlation id, when the provider assigns one
    pub channel_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for a provider cancel call
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub resource_id: String,
    pub channel_id: Option<String>,
    pub installation_id: Option<String>,
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Static configuration for this provider
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Exchange an authorization code for an initial secret pair
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderApiError>;

    /// Trade a refresh secret for a fresh access secret
    async fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, ProviderApiError>;

    /// Register a push subscription for the given target
    async fn subscribe(
        &self,
        access_secret: &str,
        request: &SubscribeRequest,
    ) -> Result<RemoteSubscription, ProviderApiError>;

    /// Cancel a push subscription provider-side
    async fn cancel(
        &self,
        access_secret: &str,
        request: &CancelRequest,
    ) -> Result<(), ProviderApiError>;

    /// Fetch the current state of a watched resource as opaque JSON
    async fn fetch_resource(
        &self,
        access_secret: &str,
        target_id: &str,
    ) -> Result<serde_json::Value, ProviderApiError>;
}
