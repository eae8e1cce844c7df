//! Short-lived signaling credentials
//!
//! The backend issues either a token or a username/password pair for the
//! signaling service, plus the caller ID the session will present. Fetching
//! is a single request/response with no retry policy of its own; the session
//! manager decides when (and whether) to try again.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Credential errors
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Request could not be sent or the response body was unreadable
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success HTTP status
    #[error("credential endpoint rejected the request (status {0})")]
    Rejected(u16),

    /// Endpoint answered 200 but reported failure in the body
    #[error("credential endpoint reported failure")]
    Denied,

    /// Response carried neither a token nor a username/password pair
    #[error("credential response carried no usable auth material")]
    MissingAuth,
}

/// Authentication material for the signaling client
///
/// Token auth is preferred when the backend issues both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAuth {
    /// Bearer-style signaling token
    Token(String),
    /// Classic username/password registration
    Password {
        /// Account name
        username: String,
        /// Account secret
        password: String,
    },
}

/// Everything the session manager needs to configure a signaling client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingCredentials {
    /// Auth material, token-preferred
    pub auth: SignalingAuth,
    /// Number presented as caller ID, when the backend knows it
    pub caller_id_number: Option<String>,
}

/// Source of signaling credentials
///
/// Implemented over HTTP by [`HttpCredentialProvider`]; tests substitute a
/// static source.
#[async_trait]
pub trait CredentialSource: Send + Sync + 'static {
    /// Fetch fresh credentials
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the backend is unreachable, rejects
    /// the request, or returns no usable auth material.
    async fn fetch(&self) -> Result<SignalingCredentials, CredentialError>;
}

/// Wire shape of the credential endpoint response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    caller_id_number: Option<String>,
}

fn credentials_from(response: TokenResponse) -> Result<SignalingCredentials, CredentialError> {
    if !response.success {
        return Err(CredentialError::Denied);
    }

    let auth = match (response.token, response.username) {
        (Some(token), _) if !token.is_empty() => SignalingAuth::Token(token),
        (_, Some(username)) if !username.is_empty() => SignalingAuth::Password {
            username,
            password: response.password.unwrap_or_default(),
        },
        _ => return Err(CredentialError::MissingAuth),
    };

    Ok(SignalingCredentials {
        auth,
        caller_id_number: response
            .caller_id_number
            .filter(|number| !number.is_empty()),
    })
}

/// Credential provider backed by the console's `POST /webrtc-token` endpoint
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    /// Create a provider for the given endpoint URL
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialProvider {
    async fn fetch(&self) -> Result<SignalingCredentials, CredentialError> {
        tracing::debug!(endpoint = %self.endpoint, "fetching signaling credentials");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "credential endpoint rejected request");
            return Err(CredentialError::Rejected(status.as_u16()));
        }

        credentials_from(response.json::<TokenResponse>().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(body: serde_json::Value) -> TokenResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_token_preferred_over_password() {
        let creds = credentials_from(response(serde_json::json!({
            "success": true,
            "token": "tok-1",
            "username": "alice",
            "password": "secret",
            "callerIdNumber": "15550001111"
        })))
        .unwrap();

        assert_eq!(creds.auth, SignalingAuth::Token("tok-1".to_string()));
        assert_eq!(creds.caller_id_number.as_deref(), Some("15550001111"));
    }

    #[test]
    fn test_password_fallback() {
        let creds = credentials_from(response(serde_json::json!({
            "success": true,
            "username": "alice",
            "password": "secret"
        })))
        .unwrap();

        assert_eq!(
            creds.auth,
            SignalingAuth::Password {
                username: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
        assert_eq!(creds.caller_id_number, None);
    }

    #[test]
    fn test_neither_token_nor_username_is_a_hard_failure() {
        let result = credentials_from(response(serde_json::json!({ "success": true })));
        assert!(matches!(result, Err(CredentialError::MissingAuth)));

        // Empty strings count as absent
        let result = credentials_from(response(serde_json::json!({
            "success": true,
            "token": "",
            "username": ""
        })));
        assert!(matches!(result, Err(CredentialError::MissingAuth)));
    }

    #[test]
    fn test_body_level_failure() {
        let result = credentials_from(response(serde_json::json!({ "success": false })));
        assert!(matches!(result, Err(CredentialError::Denied)));
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webrtc-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "token": "tok-99",
                "callerIdNumber": "15552223333"
            })))
            .mount(&server)
            .await;

        let provider =
            HttpCredentialProvider::new(format!("{}/webrtc-token", server.uri())).unwrap();
        let creds = provider.fetch().await.unwrap();
        assert_eq!(creds.auth, SignalingAuth::Token("tok-99".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_maps_http_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider =
            HttpCredentialProvider::new(format!("{}/webrtc-token", server.uri())).unwrap();
        let result = provider.fetch().await;
        assert!(matches!(result, Err(CredentialError::Rejected(503))));
    }
}
