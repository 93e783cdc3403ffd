//! Web server module: the relay's HTTP surface.
//!
//! - `OPTIONS /events`: origin-validation handshake
//! - `POST /events`: signed push capture into the queue buffer
//! - `GET /events`: drain buffered events
//! - `GET /health`: liveness

pub mod handlers;
pub mod signature;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub use handlers::{
    capture_event, health, pull_events, validate_origin, AppState, ErrorResponse,
    HealthResponse,
};
pub use signature::{sign_payload, validate_signature, SignatureAlgorithm};

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/events",
            get(pull_events).post(capture_event).options(validate_origin),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
