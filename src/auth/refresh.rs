//! Refresh-token exchange against the provider token endpoint
//!
//! A single form-encoded `grant_type=refresh_token` request/response. The
//! exchange never touches conversation state; the caller decides what to
//! persist from the returned pair.

use std::future::Future;

use serde::Deserialize;

use super::error::AuthError;
use super::state::TokenPair;
use super::ProviderConfig;

/// Token endpoint response: either a minted pair or a structured error.
#[derive(Debug, Default, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// v2 endpoints return a string code; v1 endpoints an object with a
    /// `message` field. Both are accepted.
    error: Option<serde_json::Value>,
    error_description: Option<String>,
}

/// Seam for the refresh exchange so the action runner can be driven by a
/// mock in tests.
pub trait TokenRefresher {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenPair, AuthError>> + Send;
}

/// Live refresh exchange over HTTPS.
#[derive(Debug, Clone)]
pub struct RefreshProtocol {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
}

impl RefreshProtocol {
    pub fn new(provider: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: provider.token_url(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
        }
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        tracing::debug!("POST {} (grant_type=refresh_token)", self.endpoint);

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let resp = self
            .http
            .post(&self.endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;

        classify_response(status, &body)
    }
}

impl TokenRefresher for RefreshProtocol {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenPair, AuthError>> + Send {
        RefreshProtocol::refresh(self, refresh_token)
    }
}

/// Classify a token endpoint response.
///
/// Non-2xx with a structured error body is a provider rejection; non-2xx
/// with neither error nor token is malformed. A response carrying an
/// `access_token` is accepted whatever the status. An empty `refresh_token`
/// maps to `None` so callers retain the token they already hold.
fn classify_response(status: u16, body: &str) -> Result<TokenPair, AuthError> {
    let parsed: TokenEndpointResponse = serde_json::from_str(body).unwrap_or_default();

    if !(200..300).contains(&status) {
        if let Some(err) = parsed.error {
            let detail = parsed
                .error_description
                .or_else(|| match &err {
                    serde_json::Value::String(code) => Some(code.clone()),
                    other => other
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string),
                })
                .unwrap_or_else(|| err.to_string());
            return Err(AuthError::ProviderRejected(format!(
                "{}: {}",
                status, detail
            )));
        }
        if parsed.access_token.is_none() {
            return Err(AuthError::Malformed { status });
        }
    }

    let access_token = parsed
        .access_token
        .ok_or(AuthError::Malformed { status })?;

    Ok(TokenPair {
        access_token,
        refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_with_new_refresh_token() {
        let pair = classify_response(
            200,
            r#"{"access_token":"tokB","refresh_token":"refB","expires_in":3599}"#,
        )
        .unwrap();
        assert_eq!(pair.access_token, "tokB");
        assert_eq!(pair.refresh_token.as_deref(), Some("refB"));
    }

    #[test]
    fn test_success_without_refresh_token_yields_none() {
        let pair = classify_response(200, r#"{"access_token":"tokB"}"#).unwrap();
        assert_eq!(pair.refresh_token, None);
    }

    #[test]
    fn test_empty_refresh_token_yields_none() {
        let pair =
            classify_response(200, r#"{"access_token":"tokB","refresh_token":""}"#).unwrap();
        assert_eq!(pair.refresh_token, None);
    }

    #[test]
    fn test_v2_error_body_is_provider_rejected() {
        let err = classify_response(
            400,
            r#"{"error":"invalid_grant","error_description":"AADSTS70000: refresh token expired"}"#,
        )
        .unwrap_err();
        match err {
            AuthError::ProviderRejected(msg) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("AADSTS70000"));
            }
            other => panic!("expected ProviderRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_v1_error_object_is_provider_rejected() {
        let err = classify_response(
            401,
            r#"{"error":{"code":"Unauthorized","message":"bad client secret"}}"#,
        )
        .unwrap_err();
        match err {
            AuthError::ProviderRejected(msg) => assert!(msg.contains("bad client secret")),
            other => panic!("expected ProviderRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_unstructured_failure_is_malformed() {
        let err = classify_response(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, AuthError::Malformed { status: 502 }));
    }

    #[test]
    fn test_success_status_without_token_is_malformed() {
        let err = classify_response(200, r#"{"token_type":"Bearer"}"#).unwrap_err();
        assert!(matches!(err, AuthError::Malformed { status: 200 }));
    }
}
