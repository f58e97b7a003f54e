//! Integration tests for the code-exchange path: credential creation through
//! the assembled service.

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeview::config::AppConfig;
use homeview::error::Error;
use homeview::service::SyncCore;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::setup_test_db;

async fn core_against(server: &MockServer) -> Result<SyncCore> {
    let mut config = AppConfig {
        token_cipher_key: Some(BASE64.encode([5u8; 32])),
        handshake_secret: Some("handshake-secret".to_string()),
        correlation_secret: Some("correlation-secret".to_string()),
        ..Default::default()
    };
    for settings in config.providers.values_mut() {
        settings.token_base = server.uri();
        settings.api_base = server.uri();
    }

    Ok(SyncCore::with_database(config, setup_test_db().await?)?)
}

#[tokio::test]
async fn code_exchange_stores_a_decryptable_credential() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "granted-access",
            "refresh_token": "granted-refresh",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let core = core_against(&server).await?;
    core.complete_authorization(
        "u1",
        "d1",
        "google-calendar",
        "auth-code-1",
        "https://app.example.test/callback",
        None,
    )
    .await?;

    let credential = core
        .credentials
        .find("u1", "d1", "google-calendar")
        .await?
        .expect("credential stored");
    assert_eq!(credential.access_secret, "granted-access");
    assert_eq!(credential.refresh_secret, "granted-refresh");
    Ok(())
}

#[tokio::test]
async fn exchange_without_offline_access_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "granted-access",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let core = core_against(&server).await?;
    let result = core
        .complete_authorization(
            "u1",
            "d1",
            "google-calendar",
            "auth-code-1",
            "https://app.example.test/callback",
            None,
        )
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(core.credentials.find("u1", "d1", "google-calendar").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rejected_code_does_not_create_state() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Malformed auth code.",
        })))
        .mount(&server)
        .await;

    let core = core_against(&server).await?;
    let result = core
        .complete_authorization(
            "u1",
            "d1",
            "google-calendar",
            "bad-code",
            "https://app.example.test/callback",
            None,
        )
        .await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(core.credentials.find("u1", "d1", "google-calendar").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn provider_outage_during_exchange_is_transient() -> Result<()> {
    let server = MockServer::start().await;
    // SmartThings exchanges codes against its own oauth path
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let core = core_against(&server).await?;
    let result = core
        .complete_authorization(
            "u1",
            "d1",
            "smartthings",
            "auth-code-1",
            "https://app.example.test/callback",
            Some("app-1".to_string()),
        )
        .await;

    assert!(matches!(result, Err(Error::ProviderTransient { .. })));
    Ok(())
}
