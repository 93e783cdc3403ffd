//! Event Relay - webhook push to pollable queue.
//!
//! The relay registers one webhook with the upstream provider at startup,
//! verifies every signed push against that subscription's secret, buffers
//! accepted events in a durable queue and hands them out to consumers that
//! poll `GET /events`.
//!
//! ## Architecture
//!
//! ```text
//! Provider → POST /events → QueueBuffer → GET /events → Consumer
//! ```

pub mod config;
pub mod error;
pub mod provider;
pub mod queue;
pub mod registration;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, ProviderError, QueueError, RegistrationError};
pub use provider::{ApiClient, WebhookProvider};
pub use queue::{connect_backend, Event, QueueBackend, QueueBuffer};
pub use registration::{register, SecretTable, WebhookRegistration, EVENT_TYPES};
pub use web::AppState;
