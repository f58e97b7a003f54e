//! Google Calendar gateway implementation
//!
//! Google pushes calendar changes over notification channels created with
//! `events.watch`. The channel id is chosen by the caller at watch time, so
//! the correlation token doubles as the channel id; Google assigns the
//! resource id and echoes both on every notification. Channels are cancelled
//! through the shared `channels/stop` endpoint rather than per-resource.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::providers::descriptor::ProviderDescriptor;
use crate::providers::trait_::{
    CancelRequest, ProviderApiError, ProviderGateway, RemoteSubscription, SubscribeRequest,
    TokenGrant,
};

/// Google Calendar gateway
pub struct GoogleCalendarGateway {
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    id: String,
    resource_id: String,
    /// Channel expiry in epoch milliseconds, as a string
    #[serde(default)]
    expiration: Option<String>,
}

impl GoogleCalendarGateway {
    pub const SLUG: &'static str = "google-calendar";

    /// Create a new gateway from its descriptor
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        let http = reqwest::Client::builder()
            .timeout(descriptor.http_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { descriptor, http }
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

        let grant: GoogleTokenResponse = response
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
impl ProviderGateway for GoogleCalendarGateway {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderApiError> {
        self.token_request(&[
            ("client_id", self.descriptor.client_id.as_str()),
            ("client_secret", self.descriptor.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_secret: &str) -> Result<TokenGrant, ProviderApiError> {
        // Google rarely reissues the refresh secret; the grant carries None then
        self.token_request(&[
            ("client_id", self.descriptor.client_id.as_str()),
            ("client_secret", self.descriptor.client_secret.as_str()),
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
        let body = serde_json::json!({
            "id": request.correlation_token,
            "type": "web_hook",
            "address": request.callback_url,
            "token": request.correlation_token,
            "params": { "ttl": request.lifetime.num_seconds().to_string() },
        });

        let response = self
            .http
            .post(format!(
                "{}/calendars/{}/events/watch",
                self.descriptor.api_base, request.target_id
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

        let watch: WatchResponse = response
            .json()
            .await
            .map_err(|e| ProviderApiError::Malformed(e.to_string()))?;

        let expires_at = watch
            .expiration
            .as_deref()
            .and_then(parse_epoch_millis)
            .unwrap_or_else(|| Utc::now() + request.lifetime);

        debug!(
            channel_id = %watch.id,
            resource_id = %watch.resource_id,
            "Opened Google Calendar notification channel"
        );

        Ok(RemoteSubscription {
            resource_id: watch.resource_id,
            channel_id: Some(watch.id),
            expires_at,
        })
    }

    async fn cancel(
        &self,
        access_secret: &str,
        request: &CancelRequest,
    ) -> Result<(), ProviderApiError> {
        let channel_id = request
            .channel_id
            .as_deref()
            .ok_or_else(|| {
                ProviderApiError::InvalidRequest(
                    "google channel cancellation requires the stored channel id".to_string(),
                )
            })?;

        let body = serde_json::json!({
            "id": channel_id,
            "resourceId": request.resource_id,
        });

        let response = self
            .http
            .post(format!("{}/channels/stop", self.descriptor.api_base))
            .bearer_auth(access_secret)
            .json(&body)
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
                "{}/calendars/{}/events",
                self.descriptor.api_base, target_id
            ))
            .bearer_auth(access_secret)
            .query(&[("maxResults", "50"), ("singleEvents", "true")])
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

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
