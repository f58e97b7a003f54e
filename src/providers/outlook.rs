//! Outlook calendar gateway implementation (Microsoft Graph)
//!
//! Graph models push delivery as first-class subscription objects: the
//! subscription id doubles as the resource id, and the caller-supplied
//! `clientState` is echoed on every notification. Graph reissues the refresh
//! secret on every token refresh, so the grant always carries one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::providers::descriptor::ProviderDescriptor;
use crate::providers::trait_::{
    CancelRequest, ProviderApiError, ProviderGateway, RemoteSubscription, SubscribeRequest,
    TokenGrant,
};

/// Outlook calendar gateway backed by Microsoft Graph
pub struct OutlookCalendarGateway {
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    expiration_date_time: String,
}

impl OutlookCalendarGateway {
    pub const SLUG: &'static str = "outlook-calendar";

    /// Create a new gateway from its descriptor
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        let http = reqwest::Client::builder()
            .timeout(descriptor.http_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { descriptor, http }
    }

    /// Graph scopes the events collection per calendar; `primary` means the
    /// signed-in user's default calendar.
    fn resource_path(target_id: &str) -> String {
        if target_id == "primary" {
            "/me/events".to_string()
        } else {
            format!("/me/calendars/{}/events", target_id)
        }
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, ProviderApiError> {
        let response = self
            .http
            .post(format!("{}/token", self.descriptor.token_base))
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        let grant: GraphTokenResponse = response
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
impl ProviderGateway for OutlookCalendarGateway {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderApiError> {
        let scope = self.descriptor.scopes.join(" ");
        self.token_request(&[
            ("client_id", self.descriptor.client_id.as_str()),
            ("client_secret", self.descriptor.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, ProviderApiError> {
        let scope = self.descriptor.scopes.join(" ");
        self.token_request(&[
            ("client_id", self.descriptor.client_id.as_str()),
            ("client_secret", self.descriptor.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_secret),
            ("scope", scope.as_str()),
        ])
        .await
    }

    async fn subscribe(
        &self,
        access_secret: &str,
        request: &SubscribeRequest,
    ) -> Result<RemoteSubscription, ProviderApiError> {
        let expiration = (Utc::now() + request.lifetime).to_rfc3339();
        let body = serde_json::json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": request.callback_url,
            "resource": Self::resource_path(&request.target_id),
            "expirationDateTime": expiration,
            "clientState": request.correlation_token,
        });

        let response = self
            .http
            .post(format!("{}/subscriptions", self.descriptor.api_base))
            .bearer_auth(access_secret)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderApiError::Http { status, body });
        }

        let subscription: GraphSubscription = response
            .json()
            .await
            .map_err(|e| ProviderApiError::Malformed(e.to_string()))?;

        let expires_at = DateTime::parse_from_rfc3339(&subscription.expiration_date_time)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now() + request.lifetime);

        debug!(
            subscription_id = %subscription.id,
            "Created Graph change subscription"
        );

        Ok(RemoteSubscription {
            resource_id: subscription.id,
            channel_id: None,
            expires_at,
        })
    }

    async fn cancel(
        &self,
        access_secret: &str,
        request: &CancelRequest,
    ) -> Result<(), ProviderApiError> {
        let response = self
            .http
            .delete(format!(
                "{}/subscriptions/{}",
                self.descriptor.api_base, request.resource_id
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
                "{}{}",
                self.descriptor.api_base,
                Self::resource_path(target_id)
            ))
            .bearer_auth(access_secret)
            .query(&[("$top", "50"), ("$orderby", "start/dateTime")])
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
