//! Authentication for the conversational sign-in flow
//!
//! The user signs in out-of-band in a browser; the provider callback mints a
//! one-time magic code bound to the fresh token pair, and the conversation
//! validates that code to bind the tokens to the chat session.

pub mod callback;
pub mod error;
pub mod refresh;
pub mod signin;
pub mod state;

pub use callback::{CallbackBinder, CallbackPayload, SignInProfile, TurnDelivery};
pub use error::AuthError;
pub use refresh::{RefreshProtocol, TokenRefresher};
pub use signin::{SignInCorrelation, SignInLinkIssuer};
pub use state::{AuthState, ConversationAuthState, MemoryStateStore, StateStore};

use serde::{Deserialize, Serialize};

/// Identity-provider configuration, injected into the components that talk
/// to the provider rather than read from ambient environment lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OAuth2 application (client) id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Azure AD realm/tenant ("common" for multi-tenant)
    pub realm: String,
    /// Public base URL of the host serving the sign-in redirect
    pub callback_host: String,
    /// Override for the token endpoint (derived from `realm` when unset)
    pub token_endpoint: Option<String>,
}

impl ProviderConfig {
    /// v2.0 token endpoint for this realm.
    pub fn token_url(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.realm
            )
        })
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            realm: "common".to_string(),
            callback_host: String::new(),
            token_endpoint: None,
        }
    }
}
