//! # Webhook Router
//!
//! Normalizes inbound provider notifications and routes them to live client
//! connections. Each provider pushes a different wire shape; normalization
//! reduces all of them to (resource id, change payload) pairs, ownership is
//! resolved through the subscription registry, and hits fan out through the
//! presence directory. A resolution miss is logged and dropped, never an
//! error: providers keep firing for a short window after retirement.
//!
//! Protocol acknowledgements are computed before any internal processing and
//! returned even when that processing fails; a provider that misses its
//! acknowledgement window will disable the subscription.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use crate::correlation::CorrelationSigner;
use crate::error::Error;
use crate::presence::PresenceDirectory;
use crate::providers::ProviderRegistry;
use crate::repositories::SubscriptionRepository;

/// Event name used for calendar change hints
pub const EVENT_CALENDAR_CHANGED: &str = "calendar.changed";
/// Event name used for device state hints
pub const EVENT_DEVICE: &str = "device.event";

/// Provider notification, already extracted from its transport
#[derive(Debug, Clone, Default)]
pub struct InboundNotification {
    /// Header names lower-cased by the transport layer
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<JsonValue>,
}

impl InboundNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Acknowledgement the transport layer must return to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    /// Plain success acknowledgement
    Accepted,
    /// Echo the handshake validation token back verbatim
    EchoValidationToken(String),
    /// Answer a lifecycle confirmation by echoing its target URL
    ConfirmTarget(String),
    /// Answer a liveness ping by echoing its challenge
    EchoChallenge(String),
}

/// Routes normalized provider notifications to bound connections
pub struct WebhookRouter {
    subscriptions: Arc<SubscriptionRepository>,
    presence: Arc<PresenceDirectory>,
    correlation: Arc<CorrelationSigner>,
    registry: Arc<ProviderRegistry>,
}

impl WebhookRouter {
    /// Create a new webhook router
    pub fn new(
        subscriptions: Arc<SubscriptionRepository>,
        presence: Arc<PresenceDirectory>,
        correlation: Arc<CorrelationSigner>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            subscriptions,
            presence,
            correlation,
            registry,
        }
    }

    /// Handles one inbound notification. Only an unknown provider slug is an
    /// error; everything else resolves to the protocol-required
    /// acknowledgement, with internal failures logged rather than surfaced.
    pub async fn handle(
        &self,
        provider_slug: &str,
        notification: InboundNotification,
    ) -> Result<WebhookAck, Error> {
        if !self.registry.contains(provider_slug) {
            return Err(Error::Validation(format!(
                "unknown webhook provider '{provider_slug}'"
            )));
        }

        let (ack, process) = match provider_slug {
            "google-calendar" => (WebhookAck::Accepted, self.process_google(&notification).await),
            "outlook-calendar" => {
                if let Some(ack) = outlook_validation_ack(&notification) {
                    // Handshake only; nothing to route
                    (ack, Ok(()))
                } else {
                    (
                        WebhookAck::Accepted,
                        self.process_outlook(&notification).await,
                    )
                }
            }
            "smartthings" => {
                if let Some(ack) = smartthings_lifecycle_ack(&notification) {
                    (ack, Ok(()))
                } else {
                    (
                        WebhookAck::Accepted,
                        self.process_smartthings(&notification).await,
                    )
                }
            }
            other => {
                return Err(Error::Validation(format!(
                    "unknown webhook provider '{other}'"
                )));
            }
        };

        if let Err(err) = process {
            // Ack regardless; the provider only needs to know we received it
            counter!("webhook_processing_failure_total").increment(1);
            error!(
                provider_slug = %provider_slug,
                error = %err,
                "Webhook processing failed; acknowledging anyway"
            );
        }

        Ok(ack)
    }

    async fn process_google(&self, notification: &InboundNotification) -> Result<(), Error> {
        let state = notification.header("x-goog-resource-state").unwrap_or("");
        if state == "sync" {
            // Channel-creation confirmation, not a change
            debug!("Google channel sync message acknowledged");
            return Ok(());
        }

        let Some(resource_id) = notification.header("x-goog-resource-id") else {
            warn!("Google notification without resource id dropped");
            return Ok(());
        };

        let payload = serde_json::json!({
            "resourceState": state,
            "channelId": notification.header("x-goog-channel-id"),
            "messageNumber": notification.header("x-goog-message-number"),
        });

        self.deliver_by_resource("google-calendar", resource_id, EVENT_CALENDAR_CHANGED, payload)
            .await
    }

    async fn process_outlook(&self, notification: &InboundNotification) -> Result<(), Error> {
        let items = notification
            .body
            .as_ref()
            .and_then(|b| b.get("value"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for item in items {
            let subscription_id = item
                .get("subscriptionId")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let payload = serde_json::json!({
                "changeType": item.get("changeType"),
                "resource": item.get("resource"),
                "subscriptionId": subscription_id,
            });

            // The round-tripped correlation token outranks the subscription id
            let owner = item
                .get("clientState")
                .and_then(|v| v.as_str())
                .and_then(|token| self.correlation.verify(token));

            match owner {
                Some(owner) => {
                    let delivered = self.presence.route(
                        &owner.user_id,
                        &owner.dashboard_id,
                        EVENT_CALENDAR_CHANGED,
                        payload,
                    );
                    counter!("webhook_delivered_total").increment(delivered as u64);
                }
                None => {
                    self.deliver_by_resource(
                        "outlook-calendar",
                        subscription_id,
                        EVENT_CALENDAR_CHANGED,
                        payload,
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }

    async fn process_smartthings(&self, notification: &InboundNotification) -> Result<(), Error> {
        let events = notification
            .body
            .as_ref()
            .and_then(|b| b.get("events"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for event in events {
            let Some(device_event) = event.get("deviceEvent") else {
                continue;
            };
            let Some(subscription_name) = device_event
                .get("subscriptionName")
                .and_then(|v| v.as_str())
            else {
                continue;
            };

            let payload = serde_json::json!({
                "eventType": event.get("eventType"),
                "deviceId": device_event.get("deviceId"),
                "value": device_event.get("value"),
            });

            self.deliver_by_resource("smartthings", subscription_name, EVENT_DEVICE, payload)
                .await?;
        }

        Ok(())
    }

    /// Resolves the owning subscription and fans the event out; a miss is a
    /// late notification for a retired registration and is silently dropped.
    async fn deliver_by_resource(
        &self,
        provider_slug: &str,
        resource_id: &str,
        event: &str,
        payload: JsonValue,
    ) -> Result<(), Error> {
        if resource_id.is_empty() {
            counter!("webhook_dropped_total").increment(1);
            return Ok(());
        }

        match self.subscriptions.find_by_resource_id(resource_id).await? {
            Some(subscription) => {
                let delivered = self.presence.route(
                    &subscription.user_id,
                    &subscription.dashboard_id,
                    event,
                    payload,
                );
                counter!("webhook_delivered_total").increment(delivered as u64);
                debug!(
                    provider_slug = %provider_slug,
                    resource_id = %resource_id,
                    delivered,
                    "Routed provider notification"
                );
            }
            None => {
                counter!("webhook_dropped_total").increment(1);
                debug!(
                    provider_slug = %provider_slug,
                    resource_id = %resource_id,
                    "Notification for unknown resource dropped"
                );
            }
        }

        Ok(())
    }
}

/// Graph sends a one-time handshake whose validation token must be echoed
/// back verbatim before any notifications flow.
fn outlook_validation_ack(notification: &InboundNotification) -> Option<WebhookAck> {
    notification
        .query
        .get("validationToken")
        .map(|token| WebhookAck::EchoValidationToken(token.clone()))
}

/// SmartThings lifecycle messages answered synchronously: CONFIRMATION echoes
/// its URL, PING echoes its challenge.
fn smartthings_lifecycle_ack(notification: &InboundNotification) -> Option<WebhookAck> {
    let body = notification.body.as_ref()?;
    match body.get("messageType").and_then(|v| v.as_str())? {
        "CONFIRMATION" => body
            .get("confirmationData")
            .and_then(|d| d.get("confirmationUrl"))
            .and_then(|v| v.as_str())
            .map(|url| WebhookAck::ConfirmTarget(url.to_string())),
        "PING" => body
            .get("pingData")
            .and_then(|d| d.get("challenge"))
            .and_then(|v| v.as_str())
            .map(|challenge| WebhookAck::EchoChallenge(challenge.to_string())),
        _ => None,
    }
}
