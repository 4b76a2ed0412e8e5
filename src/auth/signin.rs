//! Sign-in link issuance and conversation correlation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderConfig;

/// Opaque token round-tripped through the external sign-in flow so the
/// provider callback can be routed back to the conversation it belongs to.
///
/// Currently the serialized conversation address in plaintext, as the
/// original deployment passed it. The encoding is private to this type so a
/// signed or encrypted form can be swapped in without touching callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInCorrelation(String);

#[derive(Serialize, Deserialize)]
struct Address {
    conversation: String,
}

impl SignInCorrelation {
    /// Correlation for one sign-in attempt by the given conversation.
    pub fn for_conversation(conversation_id: &str) -> Self {
        let address = Address {
            conversation: conversation_id.to_string(),
        };
        // serializing a one-field struct of strings cannot fail
        Self(serde_json::to_string(&address).unwrap_or_default())
    }

    /// Reconstruct a correlation from the raw query parameter the provider
    /// echoed back. Called by the callback host, not the bot process.
    #[allow(dead_code)]
    pub fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// The conversation this correlation routes to, if decodable.
    pub fn conversation_id(&self) -> Option<String> {
        serde_json::from_str::<Address>(&self.0)
            .ok()
            .map(|a| a.conversation)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Builds the out-of-band browser sign-in URL for a conversation.
#[derive(Debug, Clone)]
pub struct SignInLinkIssuer {
    base: Url,
}

impl SignInLinkIssuer {
    pub fn new(provider: &ProviderConfig) -> Result<Self> {
        let base = Url::parse(&provider.callback_host)
            .with_context(|| format!("invalid callback host '{}'", provider.callback_host))?;
        Ok(Self { base })
    }

    /// Issue a sign-in link carrying a fresh correlation token for the
    /// conversation. The transport renders the link; clicking it starts the
    /// browser redirect flow on the callback host.
    pub fn issue(&self, conversation_id: &str) -> (String, SignInCorrelation) {
        let correlation = SignInCorrelation::for_conversation(conversation_id);
        let mut url = self.base.clone();
        url.set_path("/login");
        url.query_pairs_mut()
            .clear()
            .append_pair("address", correlation.as_str());
        (url.into(), correlation)
    }
}
