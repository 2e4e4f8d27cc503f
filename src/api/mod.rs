//! Webhook ingest API.
//!
//! A thin surface over the signature verifier: the handler reads the exact
//! raw body bytes, verifies them against the configured headers, and either
//! rejects with 401 (carrying only a reason code) or hands the verified
//! event to the post-processing channel. The channel replaces any notion of
//! piggybacking side effects on response writing — consumers of verified
//! events are explicit and independently testable.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::signature::SignatureVerifier;

/// A webhook that passed signature verification, handed to downstream
/// processing.
#[derive(Clone, Debug)]
pub struct VerifiedWebhook {
    /// Platform the webhook claims to originate from (path parameter)
    pub provider: String,
    /// Assigned event id (UUIDv7, time-ordered)
    pub event_id: String,
    /// Verified signature timestamp (Unix seconds)
    pub timestamp: i64,
    /// Exact body bytes as received
    pub body: Bytes,
}

/// Shared application state for the webhook API
#[derive(Clone)]
pub struct WebhookAppState {
    pub verifier: Arc<SignatureVerifier>,
    /// Header carrying the signature (`v1=<hex>`)
    pub signature_header: String,
    /// Header carrying the Unix-seconds timestamp
    pub timestamp_header: String,
    /// Verified events go here; the consumer decides what happens next
    pub sink: mpsc::Sender<VerifiedWebhook>,
}

/// Success response for webhook ingestion
#[derive(Serialize)]
struct WebhookResponse {
    #[serde(rename = "eventId")]
    event_id: String,
    received: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the webhook API router
pub fn create_webhook_router(state: WebhookAppState) -> Router {
    Router::new()
        .route("/webhooks/:provider", post(ingest_webhook))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /health - liveness check
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /webhooks/:provider - authenticate and accept a webhook
///
/// Verification runs over the exact bytes received on the wire; the body is
/// never parsed before the signature check. A rejection carries the reason
/// code only — no signature or secret material.
async fn ingest_webhook(
    State(state): State<Arc<WebhookAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_value(&headers, &state.signature_header);
    let timestamp = header_value(&headers, &state.timestamp_header);

    let verified_at = match state.verifier.verify(&body, signature, timestamp) {
        Ok(ts) => ts,
        Err(e) => {
            warn!(
                provider = %provider,
                reason = e.reason(),
                "Webhook rejected"
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: e.reason().to_string(),
                }),
            )
                .into_response();
        }
    };

    let event_id = Uuid::now_v7().to_string();

    info!(
        provider = %provider,
        event_id = %event_id,
        timestamp = verified_at,
        "Webhook verified"
    );

    let event = VerifiedWebhook {
        provider,
        event_id: event_id.clone(),
        timestamp: verified_at,
        body,
    };

    // Post-processing is decoupled from the response: a full or closed
    // channel drops the event but the sender already got its receipt from
    // the verification verdict.
    if let Err(e) = state.sink.try_send(event) {
        warn!(error = %e, "Verified webhook dropped, sink unavailable");
    }

    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            event_id,
            received: true,
        }),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
