// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AIS provider client: client-credentials token and authorization intents.
//!
//! Every call goes out over the mTLS client. Tokens are not cached; each
//! connection attempt performs a fresh exchange.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpConfig;

const TOKEN_PATH: &str = "/oauth/token";
const AUTHORIZATIONS_PATH: &str = "/accounts-psd2/v1/authorizations";

/// The provider accepts exactly one scope per client-credentials request.
pub const CLIENT_CREDENTIALS_SCOPE: &str = "accounts";

/// Remote operation an [`AisError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AisOperation {
    Token,
    CreateAuthorization,
}

impl std::fmt::Display for AisOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AisOperation::Token => write!(f, "token"),
            AisOperation::CreateAuthorization => write!(f, "authorizations"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AisError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: AisOperation,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} non-2xx: {status} body={body}")]
    Status {
        operation: AisOperation,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} response was invalid: {reason} body={body}")]
    InvalidResponse {
        operation: AisOperation,
        status: StatusCode,
        reason: String,
        body: String,
    },
}

impl AisError {
    pub fn operation(&self) -> AisOperation {
        match self {
            AisError::Transport { operation, .. }
            | AisError::Status { operation, .. }
            | AisError::InvalidResponse { operation, .. } => *operation,
        }
    }

    /// HTTP status returned by the provider, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AisError::Transport { source, .. } => source.status(),
            AisError::Status { status, .. } | AisError::InvalidResponse { status, .. } => {
                Some(*status)
            }
        }
    }
}

/// Remote operations the connect flow needs from the AIS provider.
pub trait AisGateway: Send + Sync {
    /// Exchange the client credentials for a machine-to-machine access token.
    fn client_credentials_token(&self) -> impl Future<Output = Result<String, AisError>> + Send;

    /// Create an authorization intent that expires at `expires`, returning
    /// the provider's `authorizationId`.
    fn create_authorization(
        &self,
        access_token: &str,
        expires: DateTime<Utc>,
    ) -> impl Future<Output = Result<String, AisError>> + Send;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CreateAuthorizationRequest {
    expires: String,
}

#[derive(Debug, Deserialize)]
struct CreateAuthorizationResponse {
    #[serde(default, rename = "authorizationId")]
    authorization_id: String,
}

#[derive(Debug, Clone)]
pub struct AisClient {
    http: Client,
    mtls_base: String,
    client_id: String,
    client_secret: String,
    api_key: String,
    fapi_financial_id: String,
}

impl AisClient {
    pub fn new(http: Client, config: &OpConfig) -> Self {
        Self {
            http,
            mtls_base: config.mtls_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_key: config.api_key.clone(),
            fapi_financial_id: config.fapi_financial_id.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.mtls_base, path)
    }
}

impl AisGateway for AisClient {
    async fn client_credentials_token(&self) -> Result<String, AisError> {
        let operation = AisOperation::Token;
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", CLIENT_CREDENTIALS_SCOPE),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .form(&form)
            .send()
            .await
            .map_err(|source| AisError::Transport { operation, source })?;

        let (status, body) = read_success_body(operation, response).await?;

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AisError::InvalidResponse {
                operation,
                status,
                reason: format!("parse token response: {e}"),
                body: body.clone(),
            })?;

        if token.access_token.trim().is_empty() {
            return Err(AisError::InvalidResponse {
                operation,
                status,
                reason: "missing access_token".to_string(),
                body,
            });
        }

        debug!(%status, "client credentials token issued");
        Ok(token.access_token)
    }

    async fn create_authorization(
        &self,
        access_token: &str,
        expires: DateTime<Utc>,
    ) -> Result<String, AisError> {
        let operation = AisOperation::CreateAuthorization;
        let payload = CreateAuthorizationRequest {
            expires: expires.to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let response = self
            .http
            .post(self.url(AUTHORIZATIONS_PATH))
            .header("x-api-key", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .header("x-fapi-financial-id", &self.fapi_financial_id)
            .header(header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|source| AisError::Transport { operation, source })?;

        let (status, body) = read_success_body(operation, response).await?;

        let created: CreateAuthorizationResponse =
            serde_json::from_str(&body).map_err(|e| AisError::InvalidResponse {
                operation,
                status,
                reason: format!("parse authorizations response: {e}"),
                body: body.clone(),
            })?;

        if created.authorization_id.trim().is_empty() {
            return Err(AisError::InvalidResponse {
                operation,
                status,
                reason: "missing authorizationId".to_string(),
                body,
            });
        }

        debug!(
            %status,
            authorization_id = %created.authorization_id,
            "authorization intent created"
        );
        Ok(created.authorization_id)
    }
}

/// Read the body, failing with [`AisError::Status`] unless the response is 2xx.
async fn read_success_body(
    operation: AisOperation,
    response: reqwest::Response,
) -> Result<(StatusCode, String), AisError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AisError::Status {
            operation,
            status,
            body,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| AisError::Transport { operation, source })?;
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AisClient {
        AisClient {
            http: Client::new(),
            mtls_base: server.uri(),
            client_id: "client-abc".to_string(),
            client_secret: "secret xyz".to_string(),
            api_key: "api-key-1".to_string(),
            fapi_financial_id: "fin-1".to_string(),
        }
    }

    fn expires() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn token_exchange_posts_form_and_returns_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string(
                "grant_type=client_credentials&scope=accounts&client_id=client-abc&client_secret=secret+xyz",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server).client_credentials_token().await.unwrap();
        assert_eq!(token, "tok1");
    }

    #[tokio::test]
    async fn token_exchange_non_2xx_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .client_credentials_token()
            .await
            .unwrap_err();
        match &err {
            AisError::Status {
                operation,
                status,
                body,
            } => {
                assert_eq!(*operation, AisOperation::Token);
                assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn token_exchange_rejects_empty_or_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "" })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .client_credentials_token()
            .await
            .unwrap_err();
        assert!(matches!(err, AisError::InvalidResponse { .. }));
        assert!(err.to_string().contains("missing access_token"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .client_credentials_token()
            .await
            .unwrap_err();
        assert!(matches!(err, AisError::InvalidResponse { .. }));
        assert!(err.to_string().contains("<html>oops</html>"));
    }

    #[tokio::test]
    async fn create_authorization_sends_headers_and_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts-psd2/v1/authorizations"))
            .and(header("x-api-key", "api-key-1"))
            .and(header("authorization", "Bearer tok1"))
            .and(header("x-fapi-financial-id", "fin-1"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "expires": "2026-03-01T13:00:00Z" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "authorizationId": "auth-123",
                "status": "Initialised",
                "expires": "2026-03-01T13:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .create_authorization("tok1", expires())
            .await
            .unwrap();
        assert_eq!(id, "auth-123");
    }

    #[tokio::test]
    async fn create_authorization_rejects_empty_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts-psd2/v1/authorizations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "authorizationId": "" })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_authorization("tok1", expires())
            .await
            .unwrap_err();
        assert_eq!(err.operation(), AisOperation::CreateAuthorization);
        assert!(err.to_string().contains("missing authorizationId"));
    }

    #[tokio::test]
    async fn create_authorization_non_2xx_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts-psd2/v1/authorizations"))
            .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"error":"forbidden"}"#))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_authorization("tok1", expires())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(err.to_string().contains("forbidden"));
    }
}
