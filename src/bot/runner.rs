//! Refresh-and-retry wrapper for downstream API calls
//!
//! The system is purely reactive: a call that fails is taken to mean the
//! access token expired. The runner then refreshes once, persists the new
//! pair, and retries the call exactly once. The single-retry bound is the
//! contract, not an accident of control flow.

use std::future::Future;

use crate::api::ApiError;
use crate::auth::{AuthError, ConversationAuthState, TokenRefresher};

pub struct AuthenticatedActionRunner<'a, R: TokenRefresher> {
    refresh: &'a R,
}

impl<'a, R: TokenRefresher> AuthenticatedActionRunner<'a, R> {
    pub fn new(refresh: &'a R) -> Self {
        Self { refresh }
    }

    /// Run `api_call` with the conversation's access token.
    ///
    /// On first-attempt failure: refresh the access token, persist the new
    /// pair into `state` (keeping the old refresh token when the response
    /// carries none), retry once, and return whatever the second attempt
    /// yields. A refresh failure propagates without retrying the call and
    /// leaves `state` untouched (authenticated-but-stale).
    pub async fn call_with_auth<T, F, Fut>(
        &self,
        state: &mut ConversationAuthState,
        mut api_call: F,
    ) -> Result<T, AuthError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let access_token = state
            .access_token
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        let first_err = match api_call(access_token).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        tracing::debug!(
            "api call failed ({}), refreshing access token and retrying",
            first_err
        );

        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;
        let pair = self.refresh.refresh(&refresh_token).await?;

        state.access_token = Some(pair.access_token.clone());
        if let Some(new_refresh) = pair.refresh_token {
            state.refresh_token = Some(new_refresh);
        }

        api_call(pair.access_token).await.map_err(AuthError::Api)
    }
}
