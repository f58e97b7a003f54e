//! Test utilities for lifecycle integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, plus
//! helpers for assembling the component stack around mock provider
//! endpoints.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;

use homeview::cleanup::CleanupOrchestrator;
use homeview::correlation::CorrelationSigner;
use homeview::crypto::CryptoKey;
use homeview::models::subscription;
use homeview::presence::PresenceDirectory;
use homeview::providers::{
    GoogleCalendarGateway, OutlookCalendarGateway, ProviderDescriptor, ProviderGateway,
    ProviderRegistry, SmartThingsGateway,
};
use homeview::repositories::{
    CredentialRepository, NewCredential, NewSubscription, SubscriptionRepository,
};
use homeview::subscriptions::SubscriptionCoordinator;
use homeview::token_guard::TokenGuard;
use homeview::webhooks::WebhookRouter;

pub const CORRELATION_KEY: &[u8] = b"test-correlation-key";
pub const HANDSHAKE_SECRET: &[u8] = b"test-handshake-secret";

/// Fully wired component stack over an in-memory database.
pub struct TestStack {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub credentials: Arc<CredentialRepository>,
    pub subscriptions: Arc<SubscriptionRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub guard: Arc<TokenGuard>,
    pub coordinator: Arc<SubscriptionCoordinator>,
    pub presence: Arc<PresenceDirectory>,
    pub router: WebhookRouter,
    pub cleanup: CleanupOrchestrator,
    pub correlation: Arc<CorrelationSigner>,
}

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// Pinned to a single pooled connection: every connection to `:memory:`
/// opens its own empty database, so a wider pool would scatter tables.
pub async fn setup_test_db() -> Result<Arc<sea_orm::DatabaseConnection>> {
    let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![9u8; 32]).expect("valid test key")
}

/// Builds a descriptor pointing both endpoint bases at a mock server.
pub fn descriptor(slug: &str, base: &str, refresh_buffer_seconds: u64) -> ProviderDescriptor {
    ProviderDescriptor {
        slug: slug.to_string(),
        client_id: "test-client-id".to_string(),
        client_secret: "test-client-secret".to_string(),
        token_base: base.trim_end_matches('/').to_string(),
        api_base: base.trim_end_matches('/').to_string(),
        scopes: vec!["read".to_string()],
        max_subscription_lifetime_seconds: 3600,
        refresh_buffer_seconds,
        http_timeout: StdDuration::from_secs(5),
    }
}

/// Builds the concrete gateway for a slug against a mock server.
pub fn gateway(slug: &str, base: &str, refresh_buffer_seconds: u64) -> Arc<dyn ProviderGateway> {
    let descriptor = descriptor(slug, base, refresh_buffer_seconds);
    match slug {
        "google-calendar" => Arc::new(GoogleCalendarGateway::new(descriptor)),
        "outlook-calendar" => Arc::new(OutlookCalendarGateway::new(descriptor)),
        "smartthings" => Arc::new(SmartThingsGateway::new(descriptor)),
        other => panic!("no gateway for slug '{}'", other),
    }
}

/// Assembles the full component stack around the given registry.
pub async fn stack_with_registry(registry: ProviderRegistry) -> Result<TestStack> {
    let db = setup_test_db().await?;
    let registry = Arc::new(registry);

    let credentials = Arc::new(CredentialRepository::new(db.clone(), test_crypto_key()));
    let subscriptions = Arc::new(SubscriptionRepository::new(db.clone()));
    let correlation = Arc::new(CorrelationSigner::new(CORRELATION_KEY)?);
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
        "https://hooks.test.local".to_string(),
        1800,
    ));
    let router = WebhookRouter::new(
        subscriptions.clone(),
        presence.clone(),
        correlation.clone(),
        registry.clone(),
    );
    let cleanup = CleanupOrchestrator::new(
        credentials.clone(),
        subscriptions.clone(),
        registry.clone(),
    );

    Ok(TestStack {
        db,
        credentials,
        subscriptions,
        registry,
        guard,
        coordinator,
        presence,
        router,
        cleanup,
        correlation,
    })
}

/// Stack with a single gateway registered for the slug.
pub async fn stack_with_gateway(
    slug: &str,
    base: &str,
    refresh_buffer_seconds: u64,
) -> Result<TestStack> {
    let mut registry = ProviderRegistry::new();
    registry.register(gateway(slug, base, refresh_buffer_seconds));
    stack_with_registry(registry).await
}

/// Persists a credential through the repository.
pub async fn insert_credential(
    stack: &TestStack,
    user_id: &str,
    dashboard_id: &str,
    provider_slug: &str,
    expires_at: DateTime<Utc>,
    installation_id: Option<&str>,
) -> Result<()> {
    stack
        .credentials
        .save(NewCredential {
            user_id: user_id.to_string(),
            dashboard_id: dashboard_id.to_string(),
            provider_slug: provider_slug.to_string(),
            access_secret: format!("access-{provider_slug}"),
            refresh_secret: format!("refresh-{provider_slug}"),
            expires_at,
            provider_installation_id: installation_id.map(|s| s.to_string()),
        })
        .await?;
    Ok(())
}

/// Mints a signed identity token the way a client would present it at
/// connection handshake.
pub fn mint_identity_token(user_id: &str) -> String {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    #[derive(serde::Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
    }

    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: user_id.to_string(),
            exp: (Utc::now().timestamp() + 3600) as usize,
        },
        &EncodingKey::from_secret(HANDSHAKE_SECRET),
    )
    .expect("token encodes")
}

/// Verifies a handshake and binds a fresh connection to the tenant,
/// returning the receiving end of its outbound channel.
pub fn bind_connection(
    stack: &TestStack,
    user_id: &str,
    dashboard_id: &str,
) -> tokio::sync::mpsc::UnboundedReceiver<String> {
    let token = mint_identity_token(user_id);
    let identity =
        homeview::auth::verify_identity(&token, HANDSHAKE_SECRET).expect("handshake verifies");
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    stack
        .presence
        .bind(uuid::Uuid::new_v4(), &identity, dashboard_id, tx);
    rx
}

/// Persists a subscription row through the repository.
pub async fn insert_subscription(
    stack: &TestStack,
    resource_id: &str,
    user_id: &str,
    dashboard_id: &str,
    provider_slug: &str,
    target_id: &str,
    channel_id: Option<&str>,
) -> Result<subscription::Model> {
    Ok(stack
        .subscriptions
        .create(NewSubscription {
            resource_id: resource_id.to_string(),
            user_id: user_id.to_string(),
            dashboard_id: dashboard_id.to_string(),
            provider_slug: provider_slug.to_string(),
            target_id: target_id.to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(6),
            channel_id: channel_id.map(|s| s.to_string()),
        })
        .await?)
}
