//! OAuth token exchange, refresh, and revocation.
//!
//! All authorization-server calls go through the caller-supplied
//! `reqwest::Client`, which is constructed with a request timeout. Nothing
//! here retries: a code exchange with an already-consumed code is never safe
//! to repeat, so retry policy belongs to the caller.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::{CipherError, StoredCredential, TokenSet};

use super::provider::ProviderConfig;

/// Authorization-exchange failures. Terminal for the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// State token absent from the store or past its expiry.
    UnknownOrExpiredState,
    /// The authorization server rejected the exchange, or the call failed.
    /// Carries the provider's error text (never token material).
    ExchangeFailed(String),
    /// The provider reported the refresh token invalid or revoked; a fresh
    /// authorization is required.
    RefreshTokenInvalid,
    /// Sealing or opening a credential failed.
    Cipher(CipherError),
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthError::UnknownOrExpiredState => write!(f, "unknown or expired state token"),
            OAuthError::ExchangeFailed(msg) => write!(f, "token exchange failed: {}", msg),
            OAuthError::RefreshTokenInvalid => write!(f, "refresh token invalid or revoked"),
            OAuthError::Cipher(err) => write!(f, "credential cipher error: {}", err),
        }
    }
}

impl std::error::Error for OAuthError {}

impl From<CipherError> for OAuthError {
    fn from(err: CipherError) -> Self {
        OAuthError::Cipher(err)
    }
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self) -> TokenSet {
        TokenSet::issued_now(
            self.access_token,
            self.refresh_token,
            self.token_type,
            self.scope,
            self.expires_in,
        )
    }
}

/// Exchanges an authorization code for tokens.
pub async fn exchange_code_for_token(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenSet, OAuthError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    debug!(token_url = %token_url, "Exchanging authorization code for token");

    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(OAuthError::ExchangeFailed(format!("status {}: {}", status, body)));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::ExchangeFailed(format!("invalid token response: {}", e)))?;

    debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token exchange successful"
    );

    Ok(token_response.into_token_set())
}

/// Refreshes an expired (or expiring) credential.
///
/// Decrypts the stored refresh token, posts `grant_type=refresh_token`, and
/// re-seals the result. A provider `invalid_grant` response means the refresh
/// token itself was revoked; the caller must discard the credential and start
/// a fresh authorization. If the provider does not rotate the refresh token,
/// the previous one is carried forward.
pub async fn refresh_credential(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    stored: &StoredCredential,
    key: &[u8],
) -> Result<StoredCredential, OAuthError> {
    let refresh_token = stored
        .refresh_token(key)?
        .ok_or(OAuthError::RefreshTokenInvalid)?;

    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token.as_str());
    form.insert("client_id", provider.client_id.as_str());
    form.insert("client_secret", provider.client_secret.as_str());

    debug!(token_url = %provider.token_url, "Refreshing OAuth token");

    let response = client
        .post(&provider.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if status.is_client_error() && body.contains("invalid_grant") {
            return Err(OAuthError::RefreshTokenInvalid);
        }
        return Err(OAuthError::ExchangeFailed(format!("status {}: {}", status, body)));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::ExchangeFailed(format!("invalid token response: {}", e)))?;

    let mut tokens = token_response.into_token_set();

    // Keep the existing refresh token if the provider did not rotate it
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh_token);
    }

    Ok(StoredCredential::seal(&tokens, key)?)
}

/// Best-effort token revocation at the provider.
///
/// Failure here never blocks local invalidation; the caller deletes the
/// stored credential regardless of the outcome.
pub async fn revoke_token(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    access_token: &str,
) -> Result<(), OAuthError> {
    let Some(revoke_url) = &provider.revoke_url else {
        debug!("Provider has no revocation endpoint, skipping remote revoke");
        return Ok(());
    };

    let mut form = HashMap::new();
    form.insert("token", access_token);
    form.insert("client_id", provider.client_id.as_str());
    form.insert("client_secret", provider.client_secret.as_str());

    let response = client
        .post(revoke_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

    if !response.status().is_success() {
        warn!(status = %response.status(), "Provider revocation call failed");
        return Err(OAuthError::ExchangeFailed(format!(
            "revocation returned status {}",
            response.status()
        )));
    }

    Ok(())
}
