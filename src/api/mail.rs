//! Latest-inbox-message fetch against the Outlook REST API

use serde::Deserialize;

use super::ApiError;

const DEFAULT_MAIL_ENDPOINT: &str =
    "https://outlook.office.com/api/v2.0/me/MailFolders/Inbox/messages?$top=1";

/// A single mail item. Only the subject is surfaced to the conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct MailMessage {
    #[serde(rename = "Subject", default)]
    pub subject: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    value: Vec<MailMessage>,
}

/// Bearer-token client for the user's most recent inbox message.
#[derive(Debug, Clone)]
pub struct MailClient {
    http: reqwest::Client,
    endpoint: String,
}

impl MailClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_MAIL_ENDPOINT.to_string())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// GET the newest inbox message with the given access token.
    pub async fn latest_message(&self, access_token: &str) -> Result<MailMessage, ApiError> {
        tracing::debug!("Mail GET {}", self.endpoint);

        let resp = self
            .http
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let list: MessageList = resp
            .json()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        list.value.into_iter().next().ok_or(ApiError::Empty)
    }
}

impl Default for MailClient {
    fn default() -> Self {
        Self::new()
    }
}
