//! OAuth provider configurations.
//!
//! Defines OAuth 2.0 endpoints for each supported platform. Client
//! credentials come from the environment:
//! `GATEHOUSE_OAUTH_{PROVIDER}_CLIENT_ID` / `GATEHOUSE_OAUTH_{PROVIDER}_CLIENT_SECRET`.

use serde::{Deserialize, Serialize};

/// OAuth provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Token revocation endpoint URL, when the provider has one
    pub revoke_url: Option<String>,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,
}

impl ProviderConfig {
    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

/// Get OAuth provider configuration by provider name
pub fn get_provider_config(provider_name: &str) -> Option<ProviderConfig> {
    let env_prefix = provider_name.to_uppercase();
    let client_id = std::env::var(format!("GATEHOUSE_OAUTH_{}_CLIENT_ID", env_prefix)).ok()?;
    let client_secret =
        std::env::var(format!("GATEHOUSE_OAUTH_{}_CLIENT_SECRET", env_prefix)).ok()?;

    let (auth_url, token_url, revoke_url, scopes) = match provider_name {
        "slack" => (
            "https://slack.com/oauth/v2/authorize",
            "https://slack.com/api/oauth.v2.access",
            Some("https://slack.com/api/auth.revoke"),
            vec!["chat:write", "channels:read"],
        ),
        "github" => (
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
            None,
            vec!["repo", "read:user"],
        ),
        "gitlab" => (
            "https://gitlab.com/oauth/authorize",
            "https://gitlab.com/oauth/token",
            Some("https://gitlab.com/oauth/revoke"),
            vec!["api"],
        ),
        _ => return None,
    };

    Some(ProviderConfig {
        auth_url: auth_url.to_string(),
        token_url: token_url.to_string(),
        revoke_url: revoke_url.map(String::from),
        scopes: scopes.into_iter().map(String::from).collect(),
        client_id,
        client_secret,
    })
}

/// Check if a provider name is supported
pub fn is_valid_provider(name: &str) -> bool {
    matches!(name, "slack" | "github" | "gitlab")
}
