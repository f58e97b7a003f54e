//! Integration tests for the credential repository: encryption at rest,
//! upsert semantics, rotation, and idempotent deletion.

use anyhow::Result;
use chrono::{Duration, Utc};
use sea_orm::EntityTrait;

use homeview::error::Error;
use homeview::models::credential::Entity as CredentialEntity;
use homeview::providers::ProviderRegistry;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{insert_credential, stack_with_registry};

#[tokio::test]
async fn save_find_roundtrip_decrypts_secrets() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    let expires_at = Utc::now() + Duration::hours(1);

    insert_credential(&stack, "u1", "d1", "google-calendar", expires_at, None).await?;

    let credential = stack
        .credentials
        .find("u1", "d1", "google-calendar")
        .await?
        .expect("credential stored");

    assert_eq!(credential.access_secret, "access-google-calendar");
    assert_eq!(credential.refresh_secret, "refresh-google-calendar");
    assert_eq!(credential.provider_installation_id, None);
    assert!((credential.expires_at - expires_at).num_seconds().abs() <= 1);
    Ok(())
}

#[tokio::test]
async fn secrets_are_not_stored_in_plaintext() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    insert_credential(
        &stack,
        "u1",
        "d1",
        "google-calendar",
        Utc::now() + Duration::hours(1),
        None,
    )
    .await?;

    let row = CredentialEntity::find()
        .one(&*stack.db)
        .await?
        .expect("row exists");

    assert!(!row.access_secret_ciphertext.contains("access-google-calendar"));
    assert!(!row.refresh_secret_ciphertext.contains("refresh-google-calendar"));
    Ok(())
}

#[tokio::test]
async fn save_is_an_upsert_with_fresh_ciphertexts() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    let expires_at = Utc::now() + Duration::hours(1);

    insert_credential(&stack, "u1", "d1", "google-calendar", expires_at, None).await?;
    let first = CredentialEntity::find()
        .one(&*stack.db)
        .await?
        .expect("row exists");

    insert_credential(&stack, "u1", "d1", "google-calendar", expires_at, None).await?;
    let rows = CredentialEntity::find().all(&*stack.db).await?;

    // Still one row, but identical plaintext re-encrypted under a fresh IV
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].access_secret_ciphertext, first.access_secret_ciphertext);
    assert_ne!(rows[0].refresh_secret_ciphertext, first.refresh_secret_ciphertext);
    Ok(())
}

#[tokio::test]
async fn rotate_replaces_access_and_keeps_refresh_when_not_reissued() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    insert_credential(
        &stack,
        "u1",
        "d1",
        "google-calendar",
        Utc::now() + Duration::hours(1),
        None,
    )
    .await?;

    let new_expiry = Utc::now() + Duration::hours(2);
    stack
        .credentials
        .rotate("u1", "d1", "google-calendar", "rotated-access", new_expiry, None)
        .await?;

    let credential = stack
        .credentials
        .find("u1", "d1", "google-calendar")
        .await?
        .expect("credential still stored");

    assert_eq!(credential.access_secret, "rotated-access");
    assert_eq!(credential.refresh_secret, "refresh-google-calendar");
    assert!((credential.expires_at - new_expiry).num_seconds().abs() <= 1);
    Ok(())
}

#[tokio::test]
async fn rotate_replaces_refresh_when_reissued() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    insert_credential(
        &stack,
        "u1",
        "d1",
        "outlook-calendar",
        Utc::now() + Duration::hours(1),
        None,
    )
    .await?;

    stack
        .credentials
        .rotate(
            "u1",
            "d1",
            "outlook-calendar",
            "rotated-access",
            Utc::now() + Duration::hours(2),
            Some("rotated-refresh"),
        )
        .await?;

    let credential = stack
        .credentials
        .find("u1", "d1", "outlook-calendar")
        .await?
        .expect("credential still stored");
    assert_eq!(credential.refresh_secret, "rotated-refresh");
    Ok(())
}

#[tokio::test]
async fn rotate_missing_credential_is_credential_not_found() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;

    let result = stack
        .credentials
        .rotate("u1", "d1", "google-calendar", "x", Utc::now(), None)
        .await;

    assert!(matches!(result, Err(Error::CredentialNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn delete_is_idempotent() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    insert_credential(
        &stack,
        "u1",
        "d1",
        "google-calendar",
        Utc::now() + Duration::hours(1),
        None,
    )
    .await?;

    stack.credentials.delete("u1", "d1", "google-calendar").await?;
    assert!(stack.credentials.find("u1", "d1", "google-calendar").await?.is_none());

    // Second delete of the same record must not error
    stack.credentials.delete("u1", "d1", "google-calendar").await?;
    Ok(())
}

#[tokio::test]
async fn find_all_for_dashboard_scopes_to_owner() -> Result<()> {
    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    let expires_at = Utc::now() + Duration::hours(1);

    insert_credential(&stack, "u1", "d1", "google-calendar", expires_at, None).await?;
    insert_credential(&stack, "u1", "d1", "smartthings", expires_at, Some("app-1")).await?;
    insert_credential(&stack, "u1", "d2", "google-calendar", expires_at, None).await?;
    insert_credential(&stack, "u2", "d1", "google-calendar", expires_at, None).await?;

    let credentials = stack.credentials.find_all_for_dashboard("u1", "d1").await?;
    assert_eq!(credentials.len(), 2);
    assert!(credentials.iter().any(|c| c.provider_slug == "smartthings"
        && c.provider_installation_id.as_deref() == Some("app-1")));
    Ok(())
}

#[tokio::test]
async fn corrupted_ciphertext_is_a_fatal_encryption_error() -> Result<()> {
    use sea_orm::{ActiveModelTrait, Set};

    let stack = stack_with_registry(ProviderRegistry::new()).await?;
    let now = Utc::now();

    let model = homeview::models::credential::ActiveModel {
        id: Set(uuid::Uuid::new_v4()),
        user_id: Set("u1".to_string()),
        dashboard_id: Set("d1".to_string()),
        provider_slug: Set("google-calendar".to_string()),
        access_secret_ciphertext: Set("definitely-not-ciphertext".to_string()),
        refresh_secret_ciphertext: Set("also-not-ciphertext".to_string()),
        expires_at: Set(now.into()),
        provider_installation_id: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    model.insert(&*stack.db).await?;

    let result = stack.credentials.find("u1", "d1", "google-calendar").await;
    assert!(matches!(result, Err(Error::Encryption(_))));
    Ok(())
}
