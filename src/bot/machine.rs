//! Per-conversation authentication state machine
//!
//! An explicit finite-state machine over `AuthState`, consulted on every
//! inbound turn. Transitions are synchronous; all I/O (token refresh,
//! downstream fetch) happens in the router between `handle_turn` and
//! `fetch_result`.

use serde::{Deserialize, Serialize};

use crate::auth::{
    AuthError, AuthState, CallbackPayload, ConversationAuthState, SignInLinkIssuer,
};

/// User-visible text contract. Every prompt the machine emits comes from
/// here so deployments can reword without touching transition logic.
/// `{link}`, `{name}` and `{subject}` are substituted at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub welcome: String,
    pub signin_link: String,
    pub signin_prompt: String,
    pub signin_reprompt: String,
    pub code_prompt: String,
    pub invalid_code: String,
    pub too_many_attempts: String,
    pub menu: String,
    pub latest_email: String,
    pub no_email: String,
    pub fetch_failed: String,
    pub refresh_failed: String,
    pub logged_out: String,
    pub goodbye: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            welcome: "Welcome! This bot retrieves the latest email for you after you login."
                .into(),
            signin_link: "Please click this link to sign in first: {link}".into(),
            signin_prompt: "You must first sign into your account.".into(),
            signin_reprompt: "please click the signin link.".into(),
            code_prompt: "Please enter the code you received or type 'quit' to end.".into(),
            invalid_code: "hmm... Looks like that was an invalid code. Please try again.".into(),
            too_many_attempts: "Too many invalid codes. Please sign in again.".into(),
            menu: "Welcome {name}! You are currently logged in. To get the latest email, \
                   type 'email'. To quit, type 'quit'. To log out, type 'logout'."
                .into(),
            latest_email: "Your latest email is: \"{subject}\"".into(),
            no_email: "Your inbox is empty.".into(),
            fetch_failed: "Could not retrieve your latest email. Please try again.".into(),
            refresh_failed: "Error while getting a new access token. Please try logout and \
                             login again."
                .into(),
            logged_out: "You have logged out. Goodbye.".into(),
            goodbye: "Goodbye.".into(),
        }
    }
}

/// What the machine wants done after a turn, beyond sending the replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    /// Wait for the next inbound turn.
    None,
    /// Run the downstream mail fetch with the conversation's credentials,
    /// then feed the result back through [`AuthStateMachine::fetch_result`].
    FetchLatest,
    /// The conversation ended; the transport may drop the session.
    EndSession,
}

/// Outcome of processing one inbound turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub replies: Vec<String>,
    pub action: TurnAction,
}

impl TurnReply {
    fn send(replies: Vec<String>) -> Self {
        Self {
            replies,
            action: TurnAction::None,
        }
    }

    fn with_action(replies: Vec<String>, action: TurnAction) -> Self {
        Self { replies, action }
    }
}

/// Drives the sign-in dialog for every conversation.
pub struct AuthStateMachine {
    issuer: SignInLinkIssuer,
    messages: Messages,
    max_code_attempts: u32,
}

impl AuthStateMachine {
    pub fn new(issuer: SignInLinkIssuer, messages: Messages, max_code_attempts: u32) -> Self {
        Self {
            issuer,
            messages,
            // a bound of zero would reject every code before the first try
            max_code_attempts: max_code_attempts.max(1),
        }
    }

    /// Process one inbound turn for a conversation.
    ///
    /// Mutates `state` per the transition table and returns the replies to
    /// render plus any follow-up action for the router to run.
    pub fn handle_turn(
        &self,
        conversation_id: &str,
        state: &mut ConversationAuthState,
        text: &str,
    ) -> TurnReply {
        // The authenticated predicate wins over a stale state field, in
        // both directions: restored credentials skip the sign-in dance, and
        // a cleared credential set can never stay "authenticated".
        if state.state == AuthState::Unauthenticated && state.is_authenticated() {
            state.state = AuthState::Authenticated;
        } else if state.state == AuthState::Authenticated && !state.is_authenticated() {
            state.state = AuthState::Unauthenticated;
        }

        match state.state {
            AuthState::Unauthenticated => self.start_signin(conversation_id, state, true),
            AuthState::SigninPrompted => self.accept_callback(state, text),
            AuthState::CodePending => self.validate_code(conversation_id, state, text),
            AuthState::Authenticated => self.dispatch(state, text),
        }
    }

    /// Feed the outcome of a `FetchLatest` action back into the dialog.
    pub fn fetch_result(
        &self,
        state: &ConversationAuthState,
        result: Result<String, AuthError>,
    ) -> TurnReply {
        let reply = match result {
            Ok(subject) => self.messages.latest_email.replace("{subject}", &subject),
            Err(AuthError::Api(crate::api::ApiError::Empty)) => self.messages.no_email.clone(),
            Err(e) if e.needs_relogin() => {
                // Refresh-path failure: the conversation stays authenticated
                // but stale; the user is told to log out and back in.
                tracing::warn!("token refresh failed: {}", e);
                self.messages.refresh_failed.clone()
            }
            Err(e) => {
                tracing::warn!("mail fetch failed after retry: {}", e);
                self.messages.fetch_failed.clone()
            }
        };
        TurnReply::send(vec![reply, self.menu(state)])
    }

    /// Welcome (on first activation only), issue a sign-in link, prompt.
    fn start_signin(
        &self,
        conversation_id: &str,
        state: &mut ConversationAuthState,
        welcome: bool,
    ) -> TurnReply {
        let (link, _correlation) = self.issuer.issue(conversation_id);
        tracing::debug!("issued sign-in link for conversation {}", conversation_id);

        let mut replies = Vec::new();
        if welcome {
            replies.push(self.messages.welcome.clone());
        }
        replies.push(self.messages.signin_link.replace("{link}", &link));
        replies.push(self.messages.signin_prompt.clone());

        state.state = AuthState::SigninPrompted;
        TurnReply::send(replies)
    }

    /// Expect the callback payload; anything else re-prompts in place.
    fn accept_callback(&self, state: &mut ConversationAuthState, text: &str) -> TurnReply {
        match serde_json::from_str::<CallbackPayload>(text) {
            Ok(payload) if !payload.magic_code.is_empty() && !payload.access_token.is_empty() => {
                state.set_pending_login(payload.into());
                state.state = AuthState::CodePending;
                TurnReply::send(vec![self.messages.code_prompt.clone()])
            }
            _ => TurnReply::send(vec![self.messages.signin_reprompt.clone()]),
        }
    }

    /// Exact-match the typed code against the pending magic code.
    fn validate_code(
        &self,
        conversation_id: &str,
        state: &mut ConversationAuthState,
        text: &str,
    ) -> TurnReply {
        if text == "quit" {
            state.login_data = None;
            state.code_attempts = 0;
            state.state = AuthState::Unauthenticated;
            tracing::info!("sign-in aborted by user");
            return TurnReply::with_action(
                vec![self.messages.goodbye.clone()],
                TurnAction::EndSession,
            );
        }

        // A re-delivered callback payload (the user clicked the sign-in
        // link again) replaces the pending pair: last write wins, and only
        // the most recent magic code can validate.
        if let Ok(payload) = serde_json::from_str::<CallbackPayload>(text) {
            if !payload.magic_code.is_empty() && !payload.access_token.is_empty() {
                state.set_pending_login(payload.into());
                return TurnReply::send(vec![self.messages.code_prompt.clone()]);
            }
        }

        let pending_code = state.login_data.as_ref().map(|l| l.magic_code.clone());
        match pending_code {
            // Exact string equality: case and whitespace differences reject.
            Some(code) if code == text => {
                state.promote_pending_login();
                state.state = AuthState::Authenticated;
                tracing::info!("conversation {} authenticated", conversation_id);
                TurnReply::send(vec![self.menu(state)])
            }
            Some(_) => {
                state.code_attempts += 1;
                if state.code_attempts >= self.max_code_attempts {
                    // Bound brute-forcing of a pending pair: discard it and
                    // restart the sign-in from a fresh link.
                    tracing::warn!(
                        "conversation {} exhausted {} code attempts",
                        conversation_id,
                        self.max_code_attempts
                    );
                    state.login_data = None;
                    state.code_attempts = 0;
                    state.state = AuthState::Unauthenticated;
                    let mut reply = self.start_signin(conversation_id, state, false);
                    reply
                        .replies
                        .insert(0, self.messages.too_many_attempts.clone());
                    reply
                } else {
                    TurnReply::send(vec![
                        self.messages.invalid_code.clone(),
                        self.messages.code_prompt.clone(),
                    ])
                }
            }
            // Nothing pending (e.g. state restored mid-dialog): restart.
            None => self.start_signin(conversation_id, state, false),
        }
    }

    /// Authenticated menu: fetch, logout, quit, or show the menu again.
    fn dispatch(&self, state: &mut ConversationAuthState, text: &str) -> TurnReply {
        match text {
            "email" => TurnReply::with_action(Vec::new(), TurnAction::FetchLatest),
            "logout" => {
                state.clear_credentials();
                state.state = AuthState::Unauthenticated;
                tracing::info!("user logged out");
                TurnReply::with_action(
                    vec![self.messages.logged_out.clone()],
                    TurnAction::EndSession,
                )
            }
            // quit ends the session but keeps the credentials.
            "quit" => TurnReply::with_action(
                vec![self.messages.goodbye.clone()],
                TurnAction::EndSession,
            ),
            _ => TurnReply::send(vec![self.menu(state)]),
        }
    }

    fn menu(&self, state: &ConversationAuthState) -> String {
        let name = state.user_name.as_deref().unwrap_or_default();
        self.messages.menu.replace("{name}", name)
    }
}
