// Integration tests for the authorization-code flow:
// state issuance → callback consumption → code exchange → sealed storage,
// plus refresh and revocation, against a mock authorization server.

use std::sync::Arc;

use gatehouse::credentials::{CredentialStore, StoredCredential, TokenSet};
use gatehouse::oauth::{
    exchange_code_for_token, refresh_credential, revoke_token, OAuthError, ProviderConfig,
    StateManager,
};

const KEY: [u8; 32] = [42u8; 32];

fn test_provider(server_url: &str) -> ProviderConfig {
    ProviderConfig {
        auth_url: format!("{}/authorize", server_url),
        token_url: format!("{}/token", server_url),
        revoke_url: Some(format!("{}/revoke", server_url)),
        scopes: vec!["incident:read".to_string(), "chat:write".to_string()],
        client_id: "test_client".to_string(),
        client_secret: "test_secret".to_string(),
    }
}

#[tokio::test]
async fn full_authorization_flow() {
    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"at_live","refresh_token":"rt_live","expires_in":3600,"token_type":"Bearer","scope":"incident:read chat:write"}"#,
        )
        .create_async()
        .await;

    let provider = test_provider(&server.url());
    let state_manager = StateManager::new(600);
    let store = Arc::new(CredentialStore::new(":memory:").unwrap());
    let client = reqwest::Client::new();

    // Initiate: state token embedded in the authorization URL
    let state_token = state_manager.create_state("alice", "tracker");
    let auth_url = provider.build_auth_url(&state_token, "http://localhost:8080/callback");
    assert!(auth_url.contains(&state_token));

    // Callback: consume the state before exchanging the code
    let entry = state_manager.validate_and_consume(&state_token).unwrap();
    assert_eq!(entry.owner, "alice");

    let tokens = exchange_code_for_token(
        &client,
        &provider.token_url,
        "authorization_code_value",
        "http://localhost:8080/callback",
        &provider.client_id,
        &provider.client_secret,
    )
    .await
    .unwrap();

    let credential = StoredCredential::seal(&tokens, &KEY).unwrap();
    store.store("alice", "tracker", &credential).unwrap();

    // The stored credential decrypts back to the issued tokens
    let loaded = store.get("alice", "tracker").unwrap().unwrap();
    assert_eq!(loaded.access_token(&KEY).unwrap(), "at_live");
    assert_eq!(loaded.refresh_token(&KEY).unwrap(), Some("rt_live".to_string()));
    assert_eq!(loaded.scope, "incident:read chat:write");
    assert!(!loaded.is_expired());

    token_mock.assert_async().await;
}

#[tokio::test]
async fn state_consumed_even_when_exchange_fails() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let provider = test_provider(&server.url());
    let state_manager = StateManager::new(600);
    let client = reqwest::Client::new();

    let state_token = state_manager.create_state("alice", "tracker");

    // Consume first, exchange second — the mandated ordering
    assert!(state_manager.validate_and_consume(&state_token).is_some());

    let result = exchange_code_for_token(
        &client,
        &provider.token_url,
        "code",
        "http://localhost:8080/callback",
        &provider.client_id,
        &provider.client_secret,
    )
    .await;
    assert!(matches!(result, Err(OAuthError::ExchangeFailed(_))));

    // Even though the exchange failed, the state cannot be replayed
    assert!(state_manager.validate_and_consume(&state_token).is_none());
}

#[tokio::test]
async fn second_callback_with_same_state_rejected() {
    let state_manager = StateManager::new(600);
    let state_token = state_manager.create_state("alice", "tracker");

    assert!(state_manager.validate_and_consume(&state_token).is_some());
    assert!(state_manager.validate_and_consume(&state_token).is_none());
}

#[tokio::test]
async fn refresh_replaces_stored_credential() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at_fresh","expires_in":3600}"#)
        .create_async()
        .await;

    let provider = test_provider(&server.url());
    let store = CredentialStore::new(":memory:").unwrap();
    let client = reqwest::Client::new();

    // An access token 30 seconds from expiry, well inside the 90 s margin
    let tokens = TokenSet::issued_now(
        "at_stale".to_string(),
        Some("rt_keep".to_string()),
        None,
        None,
        Some(30),
    );
    let credential = StoredCredential::seal(&tokens, &KEY).unwrap();
    store.store("alice", "tracker", &credential).unwrap();

    let stored = store.get("alice", "tracker").unwrap().unwrap();
    assert!(stored.needs_refresh(90));

    let refreshed = refresh_credential(&client, &provider, &stored, &KEY)
        .await
        .unwrap();
    store.store("alice", "tracker", &refreshed).unwrap();

    let loaded = store.get("alice", "tracker").unwrap().unwrap();
    assert_eq!(loaded.access_token(&KEY).unwrap(), "at_fresh");
    // Provider did not rotate the refresh token; the old one survives
    assert_eq!(loaded.refresh_token(&KEY).unwrap(), Some("rt_keep".to_string()));
    assert!(!loaded.needs_refresh(90));
}

#[tokio::test]
async fn revoked_refresh_token_requires_new_authorization() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let provider = test_provider(&server.url());
    let client = reqwest::Client::new();

    let tokens = TokenSet::issued_now(
        "at_old".to_string(),
        Some("rt_dead".to_string()),
        None,
        None,
        Some(-10),
    );
    let stored = StoredCredential::seal(&tokens, &KEY).unwrap();

    let result = refresh_credential(&client, &provider, &stored, &KEY).await;
    assert_eq!(result.unwrap_err(), OAuthError::RefreshTokenInvalid);
}

#[tokio::test]
async fn revoke_discards_locally_even_when_provider_fails() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/revoke")
        .with_status(500)
        .create_async()
        .await;

    let provider = test_provider(&server.url());
    let store = CredentialStore::new(":memory:").unwrap();
    let client = reqwest::Client::new();

    let tokens = TokenSet::issued_now("at_x".to_string(), None, None, None, Some(3600));
    let credential = StoredCredential::seal(&tokens, &KEY).unwrap();
    store.store("alice", "tracker", &credential).unwrap();

    // Remote revocation fails...
    let access_token = credential.access_token(&KEY).unwrap();
    let remote = revoke_token(&client, &provider, &access_token).await;
    assert!(remote.is_err());

    // ...but local invalidation proceeds unconditionally
    assert!(store.delete("alice", "tracker").unwrap());
    assert!(store.get("alice", "tracker").unwrap().is_none());
}
