//! # Service Assembly
//!
//! Builds the fully wired sync core from configuration. The HTTP shell that
//! embeds this library calls [`SyncCore::init`] once at startup, then hands
//! webhook deliveries to the router, connection handshakes to
//! [`SyncCore::verify_handshake`], and sign-outs to the cleanup orchestrator.

use std::sync::Arc;

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{HandshakeError, VerifiedIdentity, verify_identity};
use crate::cleanup::CleanupOrchestrator;
use crate::config::AppConfig;
use crate::correlation::CorrelationSigner;
use crate::db;
use crate::error::Error;
use crate::presence::PresenceDirectory;
use crate::providers::ProviderRegistry;
use crate::renewal::RenewalService;
use crate::repositories::{CredentialRepository, SubscriptionRepository};
use crate::subscriptions::SubscriptionCoordinator;
use crate::telemetry;
use crate::token_guard::TokenGuard;
use crate::webhooks::WebhookRouter;

/// The assembled lifecycle components, shared behind `Arc` so the embedding
/// shell can hand them to its handlers and background tasks.
pub struct SyncCore {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub credentials: Arc<CredentialRepository>,
    pub subscriptions: Arc<SubscriptionRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub guard: Arc<TokenGuard>,
    pub coordinator: Arc<SubscriptionCoordinator>,
    pub presence: Arc<PresenceDirectory>,
    pub router: Arc<WebhookRouter>,
    pub cleanup: Arc<CleanupOrchestrator>,
}

impl SyncCore {
    /// Initializes telemetry, connects the database pool, and wires the
    /// component graph.
    pub async fn init(config: AppConfig) -> Result<Self> {
        telemetry::init_tracing(&config).context("telemetry init failed")?;
        let pool = db::init_pool(&config).await?;
        Self::with_database(config, Arc::new(pool))
    }

    /// Wires the component graph over an existing database connection.
    pub fn with_database(config: AppConfig, db: Arc<DatabaseConnection>) -> Result<Self> {
        config.validate()?;

        let cipher_key = config.cipher_key()?;
        let correlation = Arc::new(CorrelationSigner::new(
            config
                .correlation_secret
                .as_deref()
                .unwrap_or_default()
                .as_bytes(),
        )?);

        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let credentials = Arc::new(CredentialRepository::new(db.clone(), cipher_key));
        let subscriptions = Arc::new(SubscriptionRepository::new(db.clone()));
        let presence = Arc::new(PresenceDirectory::new());

        let guard = Arc::new(TokenGuard::new(
            credentials.clone(),
            subscriptions.clone(),
            registry.clone(),
        ));
        let coordinator = Arc::new(SubscriptionCoordinator::new(
            guard.clone(),
            registry.clone(),
            subscriptions.clone(),
            correlation.clone(),
            config.callback_base_url.clone(),
            config.subscription_lifetime_seconds,
        ));
        let router = Arc::new(WebhookRouter::new(
            subscriptions.clone(),
            presence.clone(),
            correlation,
            registry.clone(),
        ));
        let cleanup = Arc::new(CleanupOrchestrator::new(
            credentials.clone(),
            subscriptions.clone(),
            registry.clone(),
        ));

        info!(
            providers = ?registry.slugs(),
            "Sync core assembled"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            credentials,
            subscriptions,
            registry,
            guard,
            coordinator,
            presence,
            router,
            cleanup,
        })
    }

    /// Completes an authorization code exchange and stores the credential for
    /// the owner. The consent redirect that produced the code happens outside
    /// this library; this is the step after the code arrives back.
    pub async fn complete_authorization(
        &self,
        user_id: &str,
        dashboard_id: &str,
        provider_slug: &str,
        code: &str,
        redirect_uri: &str,
        provider_installation_id: Option<String>,
    ) -> std::result::Result<(), Error> {
        let gateway = self.registry.get(provider_slug)?;
        let grant = gateway
            .exchange_code(code, redirect_uri)
            .await
            .map_err(|err| {
                if err.is_transient() {
                    Error::ProviderTransient {
                        provider_slug: provider_slug.to_string(),
                        detail: err.to_string(),
                    }
                } else {
                    Error::Validation(format!(
                        "authorization code rejected by '{provider_slug}': {err}"
                    ))
                }
            })?;

        // Without a refresh secret the credential would die with its first
        // access token; treat that as a failed authorization
        let refresh_secret = grant.refresh_secret.clone().ok_or_else(|| {
            Error::Validation(format!(
                "provider '{provider_slug}' returned no refresh secret; offline access was not granted"
            ))
        })?;

        self.credentials
            .save(crate::repositories::NewCredential {
                user_id: user_id.to_string(),
                dashboard_id: dashboard_id.to_string(),
                provider_slug: provider_slug.to_string(),
                access_secret: grant.access_secret.clone(),
                refresh_secret,
                expires_at: grant.expires_at(),
                provider_installation_id,
            })
            .await?;

        info!(
            provider_slug = %provider_slug,
            "Stored credential after code exchange"
        );
        Ok(())
    }

    /// Verifies a connection handshake token against the configured secret.
    pub fn verify_handshake(&self, token: &str) -> Result<VerifiedIdentity, HandshakeError> {
        let secret = self.config.handshake_secret.as_deref().unwrap_or_default();
        verify_identity(token, secret.as_bytes())
    }

    /// Spawns the background renewal sweep; it runs until the token fires.
    pub fn spawn_renewal(&self, shutdown: CancellationToken) -> JoinHandle<Result<(), Error>> {
        let service = RenewalService::new(
            self.config.renewal.clone(),
            self.subscriptions.clone(),
            self.coordinator.clone(),
        );
        tokio::spawn(async move { service.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

    fn test_config() -> AppConfig {
        AppConfig {
            token_cipher_key: Some(BASE64.encode([5u8; 32])),
            handshake_secret: Some("handshake-secret".to_string()),
            correlation_secret: Some("correlation-secret".to_string()),
            ..Default::default()
        }
    }

    async fn memory_db() -> Arc<DatabaseConnection> {
        let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        Arc::new(
            sea_orm::Database::connect(options)
                .await
                .expect("in-memory database connects"),
        )
    }

    #[tokio::test]
    async fn with_database_wires_all_builtin_providers() {
        let core = SyncCore::with_database(test_config(), memory_db().await)
            .expect("core assembles");

        assert_eq!(
            core.registry.slugs(),
            vec![
                "google-calendar".to_string(),
                "outlook-calendar".to_string(),
                "smartthings".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn with_database_rejects_incomplete_config() {
        let mut config = test_config();
        config.token_cipher_key = None;

        let result = SyncCore::with_database(config, memory_db().await);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn handshake_verification_uses_the_configured_secret() {
        use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
            exp: usize,
        }

        let core = SyncCore::with_database(test_config(), memory_db().await)
            .expect("core assembles");

        let claims = Claims {
            sub: "user-9".to_string(),
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"handshake-secret"),
        )
        .expect("token encodes");

        let identity = core.verify_handshake(&token).expect("handshake verifies");
        assert_eq!(identity.user_id(), "user-9");

        let forged = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"wrong-secret"),
        )
        .expect("token encodes");
        assert!(core.verify_handshake(&forged).is_err());
    }
}
