//! Error taxonomy for the authentication protocol

use thiserror::Error;

use crate::api::ApiError;

/// Failures from token refresh and authenticated downstream calls.
///
/// Conversational recoveries (malformed callback payload, invalid magic
/// code, user cancellation) are state transitions with a reply, not errors;
/// this enum only covers the request/response protocol.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Transport-level failure reaching the token endpoint. Retryable.
    #[error("token endpoint unreachable: {0}")]
    Transient(String),

    /// The provider answered the refresh with a structured error body.
    #[error("provider rejected token refresh: {0}")]
    ProviderRejected(String),

    /// Non-success response carrying neither a structured error nor a token.
    #[error("malformed token endpoint response (HTTP {status})")]
    Malformed { status: u16 },

    /// The conversation holds no credentials to call or refresh with.
    #[error("conversation is not authenticated")]
    NotAuthenticated,

    /// Downstream API call failed even after the single refresh-and-retry.
    #[error("downstream API call failed: {0}")]
    Api(#[from] ApiError),
}

impl AuthError {
    /// True for the refresh-path failures that mean the user should log out
    /// and sign in again.
    pub fn needs_relogin(&self) -> bool {
        matches!(
            self,
            AuthError::Transient(_)
                | AuthError::ProviderRejected(_)
                | AuthError::Malformed { .. }
                | AuthError::NotAuthenticated
        )
    }
}
