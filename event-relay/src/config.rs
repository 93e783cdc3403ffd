//! Configuration module for environment variable parsing.
//!
//! Required values fail fast: the relay cannot register its webhook or reach
//! its queue without them, so a missing key is reported with a hint on where
//! to obtain it and the process never starts serving.

use std::env;
use std::fmt;

use tracing::warn;

use crate::error::ConfigError;

/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "event-queue";

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the upstream provider API
    pub api_url: String,

    /// Externally reachable base URL of this service
    pub app_url: String,

    /// Identifier of the watched resource (the iModel)
    pub resource_id: String,

    /// OAuth authority issuing client-credentials tokens
    pub oauth_authority: String,

    /// OAuth client id
    pub oauth_client_id: String,

    /// OAuth client secret
    pub oauth_client_secret: String,

    /// OAuth scope requested with the client-credentials grant
    pub oauth_scope: String,

    /// Queue backend connection string (`amqp://`, `amqps://` or `memory://`)
    pub queue_connection_string: String,

    /// Name of the queue buffering captured events
    pub queue_name: String,

    /// Maximum number of messages returned by a single pull
    pub receive_batch_size: usize,

    /// Port for the web server to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str, hint: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing { key, hint })
        };

        Ok(Config {
            api_url: required("API_URL", "Set it to https://api.bentley.com/")?,

            app_url: required("APP_URL", "Populate it with your application URL.")?,

            resource_id: required(
                "IMODEL_ID",
                "You can create your iModel at https://developer.bentley.com/my-imodels/",
            )?,

            oauth_authority: required("OAUTH_AUTHORITY", "Set it to https://ims.bentley.com")?,

            oauth_client_id: required(
                "OAUTH_CLIENT_ID",
                "You can create your application at https://developer.bentley.com/register/",
            )?,

            oauth_client_secret: required(
                "OAUTH_CLIENT_SECRET",
                "You can create your application at https://developer.bentley.com/register/",
            )?,

            queue_connection_string: required(
                "QUEUE_CONNECTION_STRING",
                "Provide the AMQP URL of your message broker, or memory:// for local runs.",
            )?,

            oauth_scope: lookup("OAUTH_SCOPE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "itwin-platform".to_string()),

            queue_name: lookup("QUEUE_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),

            receive_batch_size: parse_or("RECEIVE_BATCH_SIZE", &lookup, 32),

            port: parse_or("PORT", &lookup, 8080),
        })
    }

    /// Callback URL the provider pushes events to.
    pub fn callback_url(&self) -> String {
        format!("{}/events", self.app_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("app_url", &self.app_url)
            .field("resource_id", &self.resource_id)
            .field("oauth_authority", &self.oauth_authority)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"<REDACTED>")
            .field("oauth_scope", &self.oauth_scope)
            .field("queue_connection_string", &"<REDACTED>")
            .field("queue_name", &self.queue_name)
            .field("receive_batch_size", &self.receive_batch_size)
            .field("port", &self.port)
            .finish()
    }
}

/// Parse an optional numeric value, falling back to `default` when absent or invalid.
fn parse_or<T, F>(name: &str, lookup: &F, default: T) -> T
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(name) {
        Some(v) => v,
        None => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, String> {
        [
            ("API_URL", "https://api.bentley.com"),
            ("APP_URL", "https://relay.example.com/"),
            ("IMODEL_ID", "imodel-1"),
            ("OAUTH_AUTHORITY", "https://ims.bentley.com"),
            ("OAUTH_CLIENT_ID", "client"),
            ("OAUTH_CLIENT_SECRET", "shh"),
            ("QUEUE_CONNECTION_STRING", "memory://"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_load_with_defaults() {
        let config = load(&full_env()).unwrap();

        assert_eq!(config.resource_id, "imodel-1");
        assert_eq!(config.queue_name, DEFAULT_QUEUE_NAME);
        assert_eq!(config.receive_batch_size, 32);
        assert_eq!(config.port, 8080);
        assert_eq!(config.oauth_scope, "itwin-platform");
    }

    #[test]
    fn test_missing_key_is_named() {
        let mut vars = full_env();
        vars.remove("IMODEL_ID");

        match load(&vars) {
            Err(ConfigError::Missing { key, hint }) => {
                assert_eq!(key, "IMODEL_ID");
                assert!(hint.contains("my-imodels"));
            }
            other => panic!("expected missing key error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = full_env();
        vars.insert("QUEUE_CONNECTION_STRING", "   ".to_string());

        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("QUEUE_CONNECTION_STRING"));
    }

    #[test]
    fn test_optional_values_parsed() {
        let mut vars = full_env();
        vars.insert("PORT", "9000".to_string());
        vars.insert("RECEIVE_BATCH_SIZE", "not-a-number".to_string());
        vars.insert("QUEUE_NAME", "custom".to_string());

        let config = load(&vars).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.receive_batch_size, 32);
        assert_eq!(config.queue_name, "custom");
    }

    #[test]
    fn test_callback_url_trims_trailing_slash() {
        let config = load(&full_env()).unwrap();
        assert_eq!(config.callback_url(), "https://relay.example.com/events");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&full_env()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("shh"));
        assert!(rendered.contains("<REDACTED>"));
    }
}
