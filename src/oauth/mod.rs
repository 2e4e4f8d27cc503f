//! OAuth 2.0 authorization flow for external platform connections.
//!
//! Implements the authorization code flow:
//! 1. User initiates a connection
//! 2. GET /api/oauth/:provider/start → Redirect to provider
//! 3. User authorizes on the provider's site
//! 4. Provider redirects to /api/oauth/:provider/callback
//! 5. Exchange code for tokens, seal and store credentials
//! 6. POST /api/oauth/:provider/refresh renews an expiring access token
//! 7. DELETE /api/oauth/:provider revokes and discards the credential

mod exchange;
mod provider;
mod state;

pub use exchange::{exchange_code_for_token, refresh_credential, revoke_token, OAuthError};
pub use provider::{get_provider_config, is_valid_provider, ProviderConfig};
pub use state::{run_state_cleanup, StateEntry, StateManager};

use crate::auth::extract_bearer_token;
use crate::credentials::{CredentialStore, StoredCredential};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for OAuth endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub credential_store: Arc<CredentialStore>,
    pub state_manager: StateManager,
    pub http: reqwest::Client,
    pub encryption_key: Vec<u8>,
    pub auth_enabled: bool,
    pub callback_base_url: String,
    pub refresh_margin_secs: i64,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
    provider: String,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/:provider/start", get(oauth_start))
        .route("/api/oauth/:provider/callback", get(oauth_callback))
        .route("/api/oauth/:provider/refresh", post(oauth_refresh))
        .route("/api/oauth/:provider", delete(oauth_revoke))
        .with_state(Arc::new(state))
}

/// Resolves the owner identity for a request.
fn resolve_owner(state: &OAuthAppState, headers: &HeaderMap) -> Result<String, AppError> {
    if state.auth_enabled {
        extract_bearer_token(headers)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    } else {
        Ok("default".to_string())
    }
}

/// Looks up the provider config, mapping the two failure modes to HTTP.
fn resolve_provider(provider_name: &str) -> Result<ProviderConfig, AppError> {
    if !provider::is_valid_provider(provider_name) {
        warn!(provider = %provider_name, "Unknown provider");
        return Err(AppError::NotFound(format!(
            "Provider '{}' not found",
            provider_name
        )));
    }

    provider::get_provider_config(provider_name).ok_or_else(|| {
        error!(provider = %provider_name, "OAuth provider config not found (missing env vars?)");
        AppError::ServerError(format!(
            "OAuth not configured for provider '{}'. Set GATEHOUSE_OAUTH_{}_CLIENT_ID and GATEHOUSE_OAUTH_{}_CLIENT_SECRET environment variables.",
            provider_name,
            provider_name.to_uppercase(),
            provider_name.to_uppercase()
        ))
    })
}

fn callback_redirect_uri(state: &OAuthAppState, provider_name: &str) -> String {
    format!(
        "{}/api/oauth/{}/callback",
        state.callback_base_url, provider_name
    )
}

/// Decodes the state query parameter once more before lookup.
///
/// At least one provider in this domain percent-encodes query parameters
/// again when redirecting back, so the state token can arrive double-encoded.
/// Our tokens are plain hex, so an extra decode of an already-plain token is
/// a no-op.
fn decode_state_param(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// What a refresh request should do with a stored credential.
#[derive(Debug, PartialEq, Eq)]
enum RefreshDisposition {
    /// Access token is comfortably within its lifetime; nothing to do.
    StillFresh,
    /// Expiring or expired, and a refresh token is available.
    Refresh,
    /// Expired with no refresh token: unusable, a new authorization is
    /// the only way forward.
    Reauthorize,
}

fn refresh_disposition(stored: &StoredCredential, margin_secs: i64) -> RefreshDisposition {
    if stored.needs_refresh(margin_secs) {
        RefreshDisposition::Refresh
    } else if stored.is_expired() {
        RefreshDisposition::Reauthorize
    } else {
        RefreshDisposition::StillFresh
    }
}

/// GET /api/oauth/:provider/start
///
/// Initiates the flow by redirecting the user to the provider's
/// authorization page.
///
/// # Security
/// - Owner identity from bearer token (when auth is enabled)
/// - Generates a single-use CSRF state parameter (256 bits from the OS
///   CSPRNG), stored in-memory with a bounded lifetime
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    debug!(provider = %provider_name, "OAuth start requested");

    let provider_config = resolve_provider(&provider_name)?;
    let owner = resolve_owner(&state, &headers)?;

    let csrf_state = state.state_manager.create_state(&owner, &provider_name);
    let redirect_uri = callback_redirect_uri(&state, &provider_name);
    let auth_url = provider_config.build_auth_url(&csrf_state, &redirect_uri);

    info!(
        provider = %provider_name,
        owner = %owner,
        "Redirecting to OAuth provider"
    );

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/oauth/:provider/callback
///
/// Validates the CSRF state, exchanges the authorization code for tokens,
/// seals them, and persists the credential.
///
/// # Security
/// - State token consumed (removed) before the code exchange is attempted,
///   so a duplicate or replayed callback can never reuse it
/// - Provider error parameters short-circuit before any state is touched
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    debug!(provider = %provider_name, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(
            provider = %provider_name,
            error = %error,
            description = %description,
            "OAuth authorization failed"
        );
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    // Resolve configuration before touching the state store so a
    // misconfigured provider does not consume the single-use token.
    let provider_config = resolve_provider(&provider_name)?;

    // Some providers re-encode query parameters on redirect; decode once
    // more before lookup.
    let csrf_state = decode_state_param(&csrf_state);

    // Validate and consume — the state is gone from the store past this
    // point even if the exchange below fails.
    let state_entry = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or(OAuthError::UnknownOrExpiredState)
        .map_err(|e| {
            warn!(provider = %provider_name, error = %e, "Rejecting callback");
            AppError::Unauthorized(format!("{} (possible CSRF attack)", e))
        })?;

    if state_entry.provider != provider_name {
        error!(
            expected = %state_entry.provider,
            actual = %provider_name,
            "Provider name mismatch"
        );
        return Err(AppError::BadRequest("Provider name mismatch".to_string()));
    }

    let owner = state_entry.owner;
    debug!(provider = %provider_name, owner = %owner, "CSRF state validated");

    let redirect_uri = callback_redirect_uri(&state, &provider_name);

    let tokens = exchange::exchange_code_for_token(
        &state.http,
        &provider_config.token_url,
        &code,
        &redirect_uri,
        &provider_config.client_id,
        &provider_config.client_secret,
    )
    .await
    .map_err(|e| {
        error!(provider = %provider_name, error = %e, "Token exchange failed");
        AppError::BadGateway(format!("Failed to exchange authorization code: {}", e))
    })?;

    let credential = StoredCredential::seal(&tokens, &state.encryption_key).map_err(|e| {
        error!(provider = %provider_name, error = %e, "Failed to seal credential");
        AppError::ServerError("Failed to seal credential".to_string())
    })?;

    state
        .credential_store
        .store(&owner, &provider_name, &credential)
        .map_err(|e| {
            error!(
                provider = %provider_name,
                owner = %owner,
                error = %e,
                "Failed to store credential"
            );
            AppError::ServerError("Failed to store credential".to_string())
        })?;

    info!(
        provider = %provider_name,
        owner = %owner,
        has_refresh_token = credential.refresh_token.is_some(),
        "OAuth flow completed successfully"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Successfully connected {}", provider_name),
        provider: provider_name,
    })
    .into_response())
}

/// POST /api/oauth/:provider/refresh
///
/// Refreshes the caller's access token if it is expiring (or already
/// expired). A refresh token reported invalid by the provider, or an
/// expired credential that never received one, discards the local
/// credential — a fresh authorization is then required.
async fn oauth_refresh(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OAuthSuccessResponse>, AppError> {
    let provider_config = resolve_provider(&provider_name)?;
    let owner = resolve_owner(&state, &headers)?;

    let stored = state
        .credential_store
        .get(&owner, &provider_name)
        .map_err(|e| AppError::ServerError(format!("Failed to load credential: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(format!("No credential stored for '{}'", provider_name))
        })?;

    match refresh_disposition(&stored, state.refresh_margin_secs) {
        RefreshDisposition::StillFresh => {
            return Ok(Json(OAuthSuccessResponse {
                success: true,
                message: "Access token still fresh, refresh not needed".to_string(),
                provider: provider_name,
            }));
        }
        RefreshDisposition::Reauthorize => {
            warn!(
                provider = %provider_name,
                owner = %owner,
                "Credential expired with no refresh token, discarding"
            );
            if let Err(err) = state.credential_store.delete(&owner, &provider_name) {
                error!(error = %err, "Failed to discard expired credential");
            }
            return Err(AppError::Unauthorized(
                "Credential expired and no refresh token was issued; re-authorization required"
                    .to_string(),
            ));
        }
        RefreshDisposition::Refresh => {}
    }

    let refreshed = exchange::refresh_credential(
        &state.http,
        &provider_config,
        &stored,
        &state.encryption_key,
    )
    .await
    .map_err(|e| match e {
        OAuthError::RefreshTokenInvalid => {
            warn!(provider = %provider_name, owner = %owner, "Refresh token revoked, discarding credential");
            if let Err(err) = state.credential_store.delete(&owner, &provider_name) {
                error!(error = %err, "Failed to discard revoked credential");
            }
            AppError::Unauthorized("Refresh token invalid; re-authorization required".to_string())
        }
        other => {
            error!(provider = %provider_name, error = %other, "Token refresh failed");
            AppError::BadGateway(format!("Token refresh failed: {}", other))
        }
    })?;

    state
        .credential_store
        .store(&owner, &provider_name, &refreshed)
        .map_err(|e| AppError::ServerError(format!("Failed to store credential: {}", e)))?;

    info!(provider = %provider_name, owner = %owner, "Access token refreshed");

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Refreshed access token for {}", provider_name),
        provider: provider_name,
    }))
}

/// DELETE /api/oauth/:provider
///
/// Revokes the caller's credential: best-effort revocation at the provider,
/// then unconditional local deletion. Local invalidation never depends on
/// the network call succeeding.
async fn oauth_revoke(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OAuthSuccessResponse>, AppError> {
    let provider_config = resolve_provider(&provider_name)?;
    let owner = resolve_owner(&state, &headers)?;

    let stored = state
        .credential_store
        .get(&owner, &provider_name)
        .map_err(|e| AppError::ServerError(format!("Failed to load credential: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(format!("No credential stored for '{}'", provider_name))
        })?;

    // Best effort: a dead revocation endpoint must not keep the credential
    // alive locally.
    match stored.access_token(&state.encryption_key) {
        Ok(access_token) => {
            if let Err(e) =
                exchange::revoke_token(&state.http, &provider_config, &access_token).await
            {
                warn!(provider = %provider_name, error = %e, "Remote revocation failed, discarding locally anyway");
            }
        }
        Err(e) => {
            warn!(provider = %provider_name, error = %e, "Could not decrypt access token for revocation, discarding locally anyway");
        }
    }

    state
        .credential_store
        .delete(&owner, &provider_name)
        .map_err(|e| AppError::ServerError(format!("Failed to delete credential: {}", e)))?;

    info!(provider = %provider_name, owner = %owner, "Credential revoked and discarded");

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Disconnected {}", provider_name),
        provider: provider_name,
    }))
}
