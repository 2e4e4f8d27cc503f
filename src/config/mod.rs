use serde::Deserialize;

/// Complete Gatehouse configuration
///
/// Loaded from a TOML file; every section and field has a default so a
/// missing file or empty table still yields a runnable configuration.
/// Secrets (webhook secret, encryption key, OAuth client credentials) come
/// from the environment, never from this file.
#[derive(Debug, Clone, Deserialize)]
pub struct GatehouseConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Webhook verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Header carrying the signature (`v1=<hex>`)
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Header carrying the Unix-seconds timestamp
    #[serde(default = "default_timestamp_header")]
    pub timestamp_header: String,
    /// Freshness window in seconds (replay bound)
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
}

fn default_signature_header() -> String {
    "x-webhook-signature".to_string()
}

fn default_timestamp_header() -> String {
    "x-webhook-timestamp".to_string()
}

fn default_tolerance_secs() -> i64 {
    300
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signature_header: default_signature_header(),
            timestamp_header: default_timestamp_header(),
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long CSRF state tokens remain valid (seconds)
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: i64,
    /// Cleanup cadence for expired state tokens (seconds)
    #[serde(default = "default_state_cleanup_interval_secs")]
    pub state_cleanup_interval_secs: u64,
    /// Base URL the provider redirects back to
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Refresh when the access token expires within this margin (seconds)
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
    /// Timeout for authorization-server calls (seconds)
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Require bearer tokens on owner-scoped endpoints
    #[serde(default)]
    pub auth_enabled: bool,
}

fn default_state_ttl_secs() -> i64 {
    600
}

fn default_state_cleanup_interval_secs() -> u64 {
    60
}

fn default_callback_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_refresh_margin_secs() -> i64 {
    90
}

fn default_provider_timeout_secs() -> u64 {
    10
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl_secs(),
            state_cleanup_interval_secs: default_state_cleanup_interval_secs(),
            callback_base_url: default_callback_base_url(),
            refresh_margin_secs: default_refresh_margin_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            auth_enabled: false,
        }
    }
}

/// Credential store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "credentials.db".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            webhook: WebhookConfig::default(),
            oauth: OAuthConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<GatehouseConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: GatehouseConfig = toml::from_str(&contents)?;
    Ok(config)
}
