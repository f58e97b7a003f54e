//! SmartThings device hub gateway implementation
//!
//! SmartThings scopes every subscription call to an installed app, so the
//! credential must carry the installation id. The subscription name is chosen
//! by the caller and is what device events reference later, making it the
//! resource id; the id SmartThings assigns in the response is kept as the
//! secondary channel id because the delete endpoint wants it. Token refresh
//! authenticates with HTTP basic credentials and returns day-long tokens.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::providers::descriptor::ProviderDescriptor;
use crate::providers::trait_::{
    CancelRequest, ProviderApiError, ProviderGateway, RemoteSubscription, SubscribeRequest,
    TokenGrant,
};

/// SmartThings device hub gateway
pub struct SmartThingsGateway {
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SmartThingsTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SmartThingsSubscription {
    id: String,
}

impl SmartThingsGateway {
    pub const SLUG: &'static str = "smartthings";

    /// Create a new gateway from its descriptor
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        let http = reqwest::Client::builder()
            .timeout(descriptor.http_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { descriptor, http }
    }

    fn installation_id<'a>(
        request_installation: Option<&'a str>,
    ) -> Result<&'a str, ProviderApiError> {
        request_installation.ok_or_else(|| {
            ProviderApiError::InvalidRequest(
                "smartthings subscription calls require the installed app id".to_string(),
            )
        })
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, ProviderApiError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.descriptor.token_base))
            .basic_auth(
                &self.descriptor.client_id,
                Some(&self.descriptor.client_secret),
            )
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        let grant: SmartThingsTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderApiError::Malformed(e.to_string()))?;

        Ok(TokenGrant {
            access_secret: grant.access_token,
            refresh_secret: grant.refresh_token,
            expires_in: grant.expires_in,
        })
    }
}

#[async_trait]
impl ProviderGateway for SmartThingsGateway {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderApiError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, ProviderApiError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_secret),
        ])
        .await
    }

    async fn subscribe(
        &self,
        access_secret: &str,
        request: &SubscribeRequest,
    ) -> Result<RemoteSubscription, ProviderApiError> {
        let installed_app = Self::installation_id(request.installation_id.as_deref())?;
        let subscription_name = format!("hv-{}", Uuid::new_v4().simple());

        let body = serde_json::json!({
            "sourceType": "DEVICE",
            "device": {
                "deviceId": request.target_id,
                "componentId": "main",
                "capability": "*",
                "attribute": "*",
                "stateChangeOnly": true,
                "subscriptionName": subscription_name,
            },
        });

        let response = self
            .http
            .post(format!(
                "{}/installedapps/{}/subscriptions",
                self.descriptor.api_base, installed_app
            ))
            .bearer_auth(access_secret)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        let subscription: SmartThingsSubscription = response
            .json()
            .await
            .map_err(|e| ProviderApiError::Malformed(e.to_string()))?;

        debug!(
            subscription_name = %subscription_name,
            subscription_id = %subscription.id,
            "Created SmartThings device subscription"
        );

        // Device subscriptions do not expire provider-side; the clamped
        // lifetime drives our own renewal cadence instead.
        Ok(RemoteSubscription {
            resource_id: subscription_name,
            channel_id: Some(subscription.id),
            expires_at: Utc::now() + request.lifetime,
        })
    }

    async fn cancel(
        &self,
        access_secret: &str,
        request: &CancelRequest,
    ) -> Result<(), ProviderApiError> {
        let installed_app = Self::installation_id(request.installation_id.as_deref())?;
        // The delete endpoint wants the assigned id, not the subscription name
        let subscription_id = request
            .channel_id
            .as_deref()
            .unwrap_or(request.resource_id.as_str());

        let response = self
            .http
            .delete(format!(
                "{}/installedapps/{}/subscriptions/{}",
                self.descriptor.api_base, installed_app, subscription_id
            ))
            .bearer_auth(access_secret)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        Ok(())
    }

    async fn fetch_resource(
        &self,
        access_secret: &str,
        target_id: &str,
    ) -> Result<serde_json::Value, ProviderApiError> {
        let response = self
            .http
            .get(format!(
                "{}/devices/{}/status",
                self.descriptor.api_base, target_id
            ))
            .bearer_auth(access_secret)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderApiError::Malformed(e.to_string()))
    }
}
