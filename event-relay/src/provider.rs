//! Upstream event provider client.
//!
//! Obtains an OAuth client-credentials token from the configured authority
//! and creates the webhook subscription through the provider's REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

use crate::error::ProviderError;
use crate::Config;

const ITWIN_PLATFORM_V2: &str = "application/vnd.bentley.itwin-platform.v2+json";

/// Subscription id and signing secret returned by webhook creation.
#[derive(Clone, PartialEq, Eq)]
pub struct CreatedWebhook {
    pub subscription_id: String,
    pub secret: String,
}

impl std::fmt::Debug for CreatedWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedWebhook")
            .field("subscription_id", &self.subscription_id)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Creates webhook subscriptions on the upstream provider.
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn create_webhook(
        &self,
        resource_id: &str,
        callback_url: &str,
        event_types: &[String],
    ) -> Result<CreatedWebhook, ProviderError>;
}

/// Credentials for the client-credentials grant.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    scope: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWebhookRequest<'a> {
    scope: &'static str,
    scope_id: &'a str,
    callback_url: &'a str,
    event_types: &'a [String],
}

#[derive(Deserialize)]
struct CreateWebhookResponse {
    webhook: WebhookBody,
}

#[derive(Deserialize)]
struct WebhookBody {
    id: String,
    secret: String,
}

/// REST client for the provider API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    api_url: Url,
    credentials: OAuthCredentials,
}

impl ApiClient {
    pub fn new(api_url: &str, credentials: OAuthCredentials) -> Result<Self, ProviderError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_url: Url::parse(&with_trailing_slash(api_url))?,
            credentials,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::new(
            &config.api_url,
            OAuthCredentials {
                authority: config.oauth_authority.clone(),
                client_id: config.oauth_client_id.clone(),
                client_secret: config.oauth_client_secret.clone(),
                scope: config.oauth_scope.clone(),
            },
        )
    }

    /// Fetch an access token with the client-credentials grant.
    async fn access_token(&self) -> Result<String, ProviderError> {
        let token_url =
            Url::parse(&with_trailing_slash(&self.credentials.authority))?.join("connect/token")?;

        let response = self
            .client
            .post(token_url)
            .form(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
                scope: &self.credentials.scope,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status_code = status.as_u16(), "oauth_token_rejected");
            return Err(ProviderError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        info!("oauth_token_acquired");
        Ok(token.access_token)
    }
}

#[async_trait]
impl WebhookProvider for ApiClient {
    async fn create_webhook(
        &self,
        resource_id: &str,
        callback_url: &str,
        event_types: &[String],
    ) -> Result<CreatedWebhook, ProviderError> {
        let token = self.access_token().await?;
        let url = self.api_url.join("webhooks/")?;

        info!(
            resource_id = %resource_id,
            callback_url = %callback_url,
            event_types = ?event_types,
            "webhook_create_request"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ITWIN_PLATFORM_V2)
            .json(&CreateWebhookRequest {
                scope: "iModel",
                scope_id: resource_id,
                callback_url,
                event_types,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status_code = status.as_u16(), body = %body, "webhook_create_rejected");
            return Err(ProviderError::WebhookRejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateWebhookResponse = response.json().await?;
        info!(subscription_id = %created.webhook.id, "webhook_created");

        Ok(CreatedWebhook {
            subscription_id: created.webhook.id,
            secret: created.webhook.secret,
        })
    }
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &server.uri(),
            OAuthCredentials {
                authority: server.uri(),
                client_id: "client".to_string(),
                client_secret: "shh".to_string(),
                scope: "itwin-platform".to_string(),
            },
        )
        .unwrap()
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "token-123",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_create_webhook_success() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/webhooks/"))
            .and(header("authorization", "Bearer token-123"))
            .and(header("accept", ITWIN_PLATFORM_V2))
            .and(body_json(serde_json::json!({
                "scope": "iModel",
                "scopeId": "imodel-1",
                "callbackUrl": "https://relay.example.com/events",
                "eventTypes": ["iModelDeletedEvent"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "webhook": {"id": "S1", "secret": "secretA", "active": true}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client_for(&server)
            .create_webhook(
                "imodel-1",
                "https://relay.example.com/events",
                &["iModelDeletedEvent".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(created.subscription_id, "S1");
        assert_eq!(created.secret, "secretA");
    }

    #[tokio::test]
    async fn test_token_rejection_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_webhook("imodel-1", "https://relay.example.com/events", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::TokenRejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_reported() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/webhooks/"))
            .respond_with(ResponseTemplate::new(404).set_body_string("iModel not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_webhook("missing", "https://relay.example.com/events", &[])
            .await
            .unwrap_err();

        match err {
            ProviderError::WebhookRejected { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let created = CreatedWebhook {
            subscription_id: "S1".to_string(),
            secret: "secretA".to_string(),
        };
        assert!(!format!("{:?}", created).contains("secretA"));
    }
}
