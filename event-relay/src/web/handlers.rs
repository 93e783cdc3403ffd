//! `/events` endpoint handlers.
//!
//! Capture only authenticates and enqueues the raw body; nothing is parsed
//! beyond the subscription id. Pull drains one batch from the queue buffer.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::queue::{EventEnvelope, QueueBuffer};
use crate::registration::SecretTable;
use crate::web::signature::validate_signature;

/// Header carrying the provider's origin token in the handshake.
pub const WEBHOOK_REQUEST_ORIGIN: HeaderName = HeaderName::from_static("webhook-request-origin");

/// Header echoing the origin token back to the provider.
pub const WEBHOOK_ALLOWED_ORIGIN: HeaderName = HeaderName::from_static("webhook-allowed-origin");

/// Header carrying `<algorithm>=<hexDigest>` on pushes.
pub const SIGNATURE: HeaderName = HeaderName::from_static("signature");

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub secrets: Arc<SecretTable>,
    pub buffer: QueueBuffer,
}

impl AppState {
    pub fn new(secrets: SecretTable, buffer: QueueBuffer) -> Self {
        Self {
            secrets: Arc::new(secrets),
            buffer,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Error body
// =============================================================================

/// Body returned with 4xx/5xx responses.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: &'static str,
}

fn reject(code: StatusCode, status: &'static str, message: &'static str) -> Response {
    (code, Json(ErrorResponse { status, message })).into_response()
}

// =============================================================================
// OPTIONS /events
// =============================================================================

/// Origin-validation handshake.
///
/// Echoes `webhook-request-origin` verbatim and declares POST as the only
/// allowed method. Nothing is stored.
pub async fn validate_origin(headers: HeaderMap) -> Response {
    let Some(origin) = headers.get(&WEBHOOK_REQUEST_ORIGIN) else {
        warn!("webhook_origin_header_missing");
        return reject(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing webhook-request-origin header",
        );
    };

    info!(origin = ?origin, "webhook_origin_validated");

    (
        StatusCode::OK,
        [
            (header::ALLOW, HeaderValue::from_static("POST")),
            (WEBHOOK_ALLOWED_ORIGIN, origin.clone()),
        ],
    )
        .into_response()
}

// =============================================================================
// POST /events
// =============================================================================

/// Push capture endpoint.
///
/// Steps, in order:
/// 1. Read `subscriptionId` from the body
/// 2. Look up that subscription's secret
/// 3. Validate the `signature` header over the raw body
/// 4. Enqueue the raw body unchanged and return 204
pub async fn capture_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let envelope: EventEnvelope = match serde_json::from_str(&body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "event_body_malformed");
            return reject(
                StatusCode::BAD_REQUEST,
                "invalid_event",
                "Event body must be JSON with a subscriptionId",
            );
        }
    };

    let Some(secret) = state.secrets.secret_for(&envelope.subscription_id) else {
        warn!(subscription_id = %envelope.subscription_id, "event_subscription_unknown");
        return reject(
            StatusCode::BAD_REQUEST,
            "unknown_subscription",
            "Failed to validate the signature",
        );
    };

    let Some(signature) = headers.get(&SIGNATURE).and_then(|v| v.to_str().ok()) else {
        warn!(subscription_id = %envelope.subscription_id, "event_signature_missing");
        return reject(
            StatusCode::BAD_REQUEST,
            "invalid_signature",
            "Failed to validate the signature",
        );
    };

    if !validate_signature(secret, body.as_bytes(), signature) {
        warn!(subscription_id = %envelope.subscription_id, "event_signature_invalid");
        return reject(
            StatusCode::BAD_REQUEST,
            "invalid_signature",
            "Failed to validate the signature",
        );
    }

    if let Err(e) = state.buffer.capture(&body).await {
        error!(
            subscription_id = %envelope.subscription_id,
            error = %e,
            "event_enqueue_failed"
        );
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            "Failed to enqueue the event",
        );
    }

    info!(
        subscription_id = %envelope.subscription_id,
        body_length = body.len(),
        "event_captured"
    );

    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// GET /events
// =============================================================================

/// Pull endpoint: drain one batch of buffered events.
///
/// Returns 200 with a JSON array, or 204 when nothing is visible. Events are
/// deleted from the queue before this response is sent.
pub async fn pull_events(State(state): State<AppState>) -> Response {
    match state.buffer.drain().await {
        Ok(events) if events.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(events) => {
            info!(count = events.len(), "events_pulled");
            (StatusCode::OK, Json(events)).into_response()
        }
        Err(e) => {
            error!(error = %e, "events_pull_failed");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                "Failed to read events from the queue",
            )
        }
    }
}
