//! Out-of-band callback binding
//!
//! When the browser redirect completes, the callback host mints a one-time
//! magic code, pairs it with the fresh token pair and the correlated
//! conversation, and re-injects that pairing into the conversation's input
//! stream as a structured turn. The HTTP listener invoking this lives
//! outside the crate; only the binding itself is modeled here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::signin::SignInCorrelation;

/// Structured message delivered into the conversation after browser sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub magic_code: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
}

/// Identity attributes from the provider's redirect profile.
#[derive(Debug, Clone)]
pub struct SignInProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

/// Delivery path back into a conversation's sequential input stream.
pub trait TurnDelivery {
    fn deliver(&self, conversation_id: &str, text: String) -> Result<()>;
}

/// Mint a short one-time code: 4 random bytes, lowercase hex.
pub fn mint_magic_code() -> Result<String> {
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes).context("failed to gather magic-code entropy")?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Binds a completed browser sign-in back to its conversation.
pub struct CallbackBinder<D> {
    delivery: D,
}

impl<D: TurnDelivery> CallbackBinder<D> {
    pub fn new(delivery: D) -> Self {
        Self { delivery }
    }

    /// Mint a magic code for the fresh token pair and inject the payload
    /// into the correlated conversation. Returns the code so the redirect
    /// page can show it to the user.
    ///
    /// Delivery goes through the conversation's normal input stream, so the
    /// sequential-processing guarantee is preserved.
    pub fn bind(
        &self,
        correlation: &SignInCorrelation,
        profile: SignInProfile,
        access_token: String,
        refresh_token: String,
    ) -> Result<String> {
        let conversation_id = correlation
            .conversation_id()
            .context("sign-in correlation does not decode to a conversation")?;

        let magic_code = mint_magic_code()?;
        let payload = CallbackPayload {
            magic_code: magic_code.clone(),
            access_token,
            refresh_token,
            user_id: profile.user_id,
            name: profile.name,
            email: profile.email,
        };

        let text =
            serde_json::to_string(&payload).context("failed to serialize callback payload")?;
        self.delivery.deliver(&conversation_id, text)?;

        tracing::info!("sign-in callback bound to conversation {}", conversation_id);
        Ok(magic_code)
    }
}
