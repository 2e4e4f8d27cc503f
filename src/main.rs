use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use gatehouse::api::{create_webhook_router, VerifiedWebhook, WebhookAppState};
use gatehouse::config::{load_config, GatehouseConfig};
use gatehouse::credentials::{validate_key, CredentialStore};
use gatehouse::oauth::{create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};
use gatehouse::signature::SignatureVerifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=info".into()),
        )
        .init();

    info!("Gatehouse starting...");

    // Configuration: optional TOML file, defaults otherwise
    let config = match std::env::var("GATEHOUSE_CONFIG") {
        Ok(path) => load_config(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {}: {}", path, e))?,
        Err(_) => GatehouseConfig::default(),
    };

    // Secrets come from the environment only
    let webhook_secret = std::env::var("GATEHOUSE_WEBHOOK_SECRET")
        .context("GATEHOUSE_WEBHOOK_SECRET must be set")?;
    let encryption_key_b64 = std::env::var("GATEHOUSE_ENCRYPTION_KEY")
        .context("GATEHOUSE_ENCRYPTION_KEY must be set")?;
    let encryption_key =
        validate_key(&encryption_key_b64).context("Invalid GATEHOUSE_ENCRYPTION_KEY")?;

    let verifier = Arc::new(SignatureVerifier::with_tolerance(
        webhook_secret.into_bytes(),
        config.webhook.tolerance_secs,
    ));

    let credential_store = Arc::new(
        CredentialStore::new(&config.credentials.db_path)
            .context("Failed to open credential store")?,
    );

    let state_manager = StateManager::new(config.oauth.state_ttl_secs);
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        config.oauth.state_cleanup_interval_secs,
    ));

    // Single HTTP client for all authorization-server calls, bounded by a
    // request timeout. No automatic retries.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.oauth.provider_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    // Verified webhooks land on this channel; downstream processing is a
    // separate, explicit consumer.
    let (sink, mut verified_rx) = mpsc::channel::<VerifiedWebhook>(1024);
    tokio::spawn(async move {
        while let Some(event) = verified_rx.recv().await {
            info!(
                provider = %event.provider,
                event_id = %event.event_id,
                bytes = event.body.len(),
                "Processing verified webhook"
            );
        }
        warn!("Verified webhook channel closed");
    });

    let webhook_router = create_webhook_router(WebhookAppState {
        verifier,
        signature_header: config.webhook.signature_header.clone(),
        timestamp_header: config.webhook.timestamp_header.clone(),
        sink,
    });

    let oauth_router = create_oauth_router(OAuthAppState {
        credential_store,
        state_manager,
        http,
        encryption_key,
        auth_enabled: config.oauth.auth_enabled,
        callback_base_url: config.oauth.callback_base_url.clone(),
        refresh_margin_secs: config.oauth.refresh_margin_secs,
    });

    let app = webhook_router.merge(oauth_router);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(addr = %config.server.bind_addr, "Gatehouse listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
