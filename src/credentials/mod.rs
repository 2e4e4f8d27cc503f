//! Encrypted credential storage for OAuth tokens.
//!
//! This module provides secure storage for OAuth access and refresh tokens
//! using AES-256-GCM encryption backed by SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenSet (plaintext)               │
//! │  - Held in memory only, never persisted  │
//! └─────────────────────────────────────────┘
//!          ↓ seal                 ↑ open
//! ┌─────────────────────────────────────────┐
//! │       StoredCredential                   │
//! │  - EncryptedSecret per token             │
//! │  - Plaintext metadata (type, scope,      │
//! │    issued_at, expires_at)                │
//! └─────────────────────────────────────────┘
//!          ↓ store                ↑ get
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - Opaque keyed persistence              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Tokens are encrypted at rest, each under a unique nonce
//! - Master key is 32 bytes (256 bits), held in memory only
//! - Authenticated encryption (tampering detected before any plaintext
//!   is released)
//! - Plaintext tokens and the key never appear in logs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, validate_key, CipherError, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use storage::CredentialStore;

/// Access-token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Seconds before expiry at which a refresh should be attempted.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 90;

/// An encrypted secret as held at rest: ciphertext, IV, and integrity tag,
/// each base64-encoded. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// AES-256-GCM ciphertext (base64)
    pub ciphertext: String,

    /// 12-byte GCM nonce (base64), unique per encryption
    pub iv: String,

    /// 16-byte authentication tag (base64), binds iv and ciphertext
    pub tag: String,
}

/// Plaintext token material as returned by the authorization server.
///
/// Ephemeral: exists only between the provider call and sealing into a
/// [`StoredCredential`]. Never serialized or logged.
#[derive(Clone, Debug)]
pub struct TokenSet {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// Token type reported by the provider (usually "Bearer")
    pub token_type: String,

    /// Granted scopes, space-separated
    pub scope: String,

    /// When the tokens were issued (UTC)
    pub issued_at: DateTime<Utc>,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Builds a token set issued now, deriving `expires_at` from the
    /// provider-reported lifetime (or the customary 3600 s when absent).
    pub fn issued_now(
        access_token: String,
        refresh_token: Option<String>,
        token_type: Option<String>,
        scope: Option<String>,
        expires_in: Option<i64>,
    ) -> Self {
        let issued_at = Utc::now();
        let lifetime = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            access_token,
            refresh_token,
            token_type: token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: scope.unwrap_or_default(),
            issued_at,
            expires_at: issued_at + Duration::seconds(lifetime),
        }
    }
}

/// A credential as persisted: encrypted tokens plus plaintext metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Encrypted access token
    pub access_token: EncryptedSecret,

    /// Encrypted refresh token, if the provider issued one
    pub refresh_token: Option<EncryptedSecret>,

    /// Token type (plaintext metadata)
    pub token_type: String,

    /// Granted scopes (plaintext metadata)
    pub scope: String,

    /// When the tokens were issued (UTC)
    pub issued_at: DateTime<Utc>,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Encrypts a plaintext token set into its at-rest form.
    pub fn seal(tokens: &TokenSet, key: &[u8]) -> Result<Self, CipherError> {
        let access_token = encryption::encrypt(&tokens.access_token, key)?;
        let refresh_token = match &tokens.refresh_token {
            Some(token) => Some(encryption::encrypt(token, key)?),
            None => None,
        };

        Ok(Self {
            access_token,
            refresh_token,
            token_type: tokens.token_type.clone(),
            scope: tokens.scope.clone(),
            issued_at: tokens.issued_at,
            expires_at: tokens.expires_at,
        })
    }

    /// Decrypts the access token.
    pub fn access_token(&self, key: &[u8]) -> Result<String, CipherError> {
        encryption::decrypt(&self.access_token, key)
    }

    /// Decrypts the refresh token, if present.
    pub fn refresh_token(&self, key: &[u8]) -> Result<Option<String>, CipherError> {
        match &self.refresh_token {
            Some(secret) => Ok(Some(encryption::decrypt(secret, key)?)),
            None => Ok(None),
        }
    }

    /// True once the access token is past `expires_at`. An expired
    /// credential must not be used for authenticated calls without a
    /// successful refresh.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// True when the access token expires within `margin_secs` (or already
    /// has) and a refresh token is available.
    pub fn needs_refresh(&self, margin_secs: i64) -> bool {
        if self.refresh_token.is_none() {
            return false;
        }
        let threshold = Utc::now() + Duration::seconds(margin_secs);
        self.expires_at <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [3u8; 32];

    fn token_set(refresh: Option<&str>, expires_in: Option<i64>) -> TokenSet {
        TokenSet::issued_now(
            "access-token-value".to_string(),
            refresh.map(String::from),
            Some("Bearer".to_string()),
            Some("incident:read chat:write".to_string()),
            expires_in,
        )
    }

    #[test]
    fn seal_and_open_roundtrip() {
        let tokens = token_set(Some("refresh-token-value"), Some(7200));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();

        assert_eq!(sealed.access_token(&KEY).unwrap(), "access-token-value");
        assert_eq!(
            sealed.refresh_token(&KEY).unwrap(),
            Some("refresh-token-value".to_string())
        );
        assert_eq!(sealed.token_type, "Bearer");
        assert_eq!(sealed.scope, "incident:read chat:write");
    }

    #[test]
    fn seal_without_refresh_token() {
        let tokens = token_set(None, Some(3600));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();

        assert!(sealed.refresh_token.is_none());
        assert_eq!(sealed.refresh_token(&KEY).unwrap(), None);
    }

    #[test]
    fn expires_at_derived_from_lifetime() {
        let tokens = token_set(None, Some(7200));
        assert_eq!(tokens.expires_at, tokens.issued_at + Duration::seconds(7200));

        // Provider silent on lifetime: 3600 s assumed
        let tokens = token_set(None, None);
        assert_eq!(tokens.expires_at, tokens.issued_at + Duration::seconds(3600));
    }

    #[test]
    fn needs_refresh_no_refresh_token() {
        let mut tokens = token_set(None, Some(30));
        tokens.refresh_token = None;
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();
        assert!(!sealed.needs_refresh(DEFAULT_REFRESH_MARGIN_SECS));
    }

    #[test]
    fn needs_refresh_far_future() {
        let tokens = token_set(Some("r"), Some(7200));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();
        assert!(!sealed.needs_refresh(DEFAULT_REFRESH_MARGIN_SECS));
    }

    #[test]
    fn needs_refresh_near_expiry() {
        let tokens = token_set(Some("r"), Some(30));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();
        assert!(sealed.needs_refresh(DEFAULT_REFRESH_MARGIN_SECS));
    }

    #[test]
    fn needs_refresh_already_expired() {
        let tokens = token_set(Some("r"), Some(-10));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();
        assert!(sealed.needs_refresh(DEFAULT_REFRESH_MARGIN_SECS));
        assert!(sealed.is_expired());
    }

    #[test]
    fn stored_credential_serializes_with_base64_fields() {
        let tokens = token_set(Some("r"), Some(3600));
        let sealed = StoredCredential::seal(&tokens, &KEY).unwrap();

        let json = serde_json::to_string(&sealed).unwrap();
        assert!(json.contains("\"ciphertext\""));
        assert!(json.contains("\"iv\""));
        assert!(json.contains("\"tag\""));
        // Plaintext token material must not leak into the serialized form
        assert!(!json.contains("access-token-value"));
        assert!(!json.contains("refresh-token-value"));
    }
}
