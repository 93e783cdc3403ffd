//! Error types for the relay.
//!
//! Startup errors (`ConfigError`, `RegistrationError`) are fatal and stop the
//! process before it serves traffic. `QueueError` and `ProviderError` fail a
//! single request and are never retried here.

use thiserror::Error;

/// A required configuration value is absent or unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration value for {key}. {hint}")]
    Missing {
        key: &'static str,
        hint: &'static str,
    },

    #[error("Unsupported queue connection string scheme: {0}")]
    UnsupportedQueueScheme(String),
}

/// Failure talking to the queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    Connection(String),

    #[error("queue operation '{operation}' failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("message {id} not found or receipt {receipt} is stale")]
    MessageNotFound { id: String, receipt: String },

    #[error("invalid receipt token: {0}")]
    InvalidReceipt(String),
}

impl QueueError {
    pub(crate) fn operation(operation: &'static str, err: impl std::fmt::Display) -> Self {
        QueueError::Operation {
            operation,
            message: err.to_string(),
        }
    }
}

impl From<lapin::Error> for QueueError {
    fn from(err: lapin::Error) -> Self {
        QueueError::Connection(err.to_string())
    }
}

/// Failure calling the upstream event provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token request rejected with status {status}: {body}")]
    TokenRejected { status: u16, body: String },

    #[error("webhook creation rejected with status {status}: {body}")]
    WebhookRejected { status: u16, body: String },
}

/// Webhook registration could not be completed at startup.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("webhook registration failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("provider returned an empty {0}")]
    EmptyField(&'static str),
}
