//! Webhook registration and the subscription secret table.
//!
//! Exactly one webhook is registered per process, before the listener binds.
//! The returned secret lives only in memory: after a restart the old
//! subscription can no longer be validated and a new one is created.

use std::collections::HashMap;
use std::fmt;

use tracing::{error, info};

use crate::error::RegistrationError;
use crate::provider::WebhookProvider;

/// Event types the relay subscribes to.
pub const EVENT_TYPES: [&str; 2] = ["iModelDeletedEvent", "NamedVersionCreatedEvent"];

/// The webhook created for this process.
#[derive(Clone)]
pub struct WebhookRegistration {
    pub subscription_id: String,
    pub secret: String,
    pub callback_url: String,
    pub event_types: Vec<String>,
}

impl fmt::Debug for WebhookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookRegistration")
            .field("subscription_id", &self.subscription_id)
            .field("secret", &"<REDACTED>")
            .field("callback_url", &self.callback_url)
            .field("event_types", &self.event_types)
            .finish()
    }
}

/// Immutable subscription id → secret lookup.
///
/// Built once at startup and shared read-only between request handlers.
#[derive(Clone, Default)]
pub struct SecretTable {
    secrets: HashMap<String, String>,
}

impl SecretTable {
    pub fn from_registration(registration: &WebhookRegistration) -> Self {
        let mut secrets = HashMap::with_capacity(1);
        secrets.insert(
            registration.subscription_id.clone(),
            registration.secret.clone(),
        );
        Self { secrets }
    }

    pub fn secret_for(&self, subscription_id: &str) -> Option<&str> {
        self.secrets.get(subscription_id).map(String::as_str)
    }
}

impl fmt::Debug for SecretTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.secrets.keys()).finish()
    }
}

/// Register the process webhook with the upstream provider.
///
/// Any failure is returned unchanged; the caller is expected to abort
/// startup since the relay cannot validate pushes without a registration.
pub async fn register<P>(
    provider: &P,
    resource_id: &str,
    callback_url: &str,
    event_types: &[&str],
) -> Result<WebhookRegistration, RegistrationError>
where
    P: WebhookProvider + ?Sized,
{
    let event_types: Vec<String> = event_types.iter().map(|t| t.to_string()).collect();

    let created = provider
        .create_webhook(resource_id, callback_url, &event_types)
        .await
        .map_err(|e| {
            error!(resource_id = %resource_id, error = %e, "webhook_registration_failed");
            RegistrationError::from(e)
        })?;

    if created.subscription_id.trim().is_empty() {
        return Err(RegistrationError::EmptyField("subscription id"));
    }
    if created.secret.is_empty() {
        return Err(RegistrationError::EmptyField("secret"));
    }

    info!(
        subscription_id = %created.subscription_id,
        callback_url = %callback_url,
        event_types = ?event_types,
        "webhook_registered"
    );

    Ok(WebhookRegistration {
        subscription_id: created.subscription_id,
        secret: created.secret,
        callback_url: callback_url.to_string(),
        event_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::CreatedWebhook;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubProvider {
        result: Result<CreatedWebhook, u16>,
        calls: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    impl StubProvider {
        fn returning(subscription_id: &str, secret: &str) -> Self {
            Self {
                result: Ok(CreatedWebhook {
                    subscription_id: subscription_id.to_string(),
                    secret: secret.to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn rejecting(status: u16) -> Self {
            Self {
                result: Err(status),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WebhookProvider for StubProvider {
        async fn create_webhook(
            &self,
            resource_id: &str,
            callback_url: &str,
            event_types: &[String],
        ) -> Result<CreatedWebhook, ProviderError> {
            self.calls.lock().unwrap().push((
                resource_id.to_string(),
                callback_url.to_string(),
                event_types.to_vec(),
            ));
            self.result
                .clone()
                .map_err(|status| ProviderError::WebhookRejected {
                    status,
                    body: "rejected".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_register_builds_single_entry_table() {
        let provider = StubProvider::returning("S1", "secretA");

        let registration = register(
            &provider,
            "imodel-1",
            "https://relay.example.com/events",
            &EVENT_TYPES,
        )
        .await
        .unwrap();

        let table = SecretTable::from_registration(&registration);
        assert_eq!(table.secret_for("S1"), Some("secretA"));
        assert_eq!(table.secret_for("S2"), None);
        assert_eq!(format!("{:?}", table), r#"{"S1"}"#);

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "imodel-1");
        assert_eq!(calls[0].2, vec!["iModelDeletedEvent", "NamedVersionCreatedEvent"]);
    }

    #[tokio::test]
    async fn test_register_propagates_provider_failure() {
        let provider = StubProvider::rejecting(403);

        let err = register(&provider, "imodel-1", "https://relay.example.com/events", &EVENT_TYPES)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistrationError::Provider(ProviderError::WebhookRejected { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_secret() {
        let provider = StubProvider::returning("S1", "");

        let err = register(&provider, "imodel-1", "https://relay.example.com/events", &EVENT_TYPES)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::EmptyField("secret")));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let registration = WebhookRegistration {
            subscription_id: "S1".to_string(),
            secret: "secretA".to_string(),
            callback_url: "https://relay.example.com/events".to_string(),
            event_types: vec!["iModelDeletedEvent".to_string()],
        };
        let table = SecretTable::from_registration(&registration);

        assert!(!format!("{:?}", registration).contains("secretA"));
        assert!(!format!("{:?}", table).contains("secretA"));
        assert!(format!("{:?}", table).contains("S1"));
    }
}
