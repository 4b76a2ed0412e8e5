//! Per-conversation authentication state

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::callback::CallbackPayload;

/// Access/refresh token pair minted by the provider.
///
/// A refresh response may omit `refresh_token`; callers must then keep the
/// refresh token they already hold rather than overwrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Pending sign-in delivered by the callback, consumed on code validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub magic_code: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
}

impl From<CallbackPayload> for LoginData {
    fn from(p: CallbackPayload) -> Self {
        Self {
            magic_code: p.magic_code,
            access_token: p.access_token,
            refresh_token: p.refresh_token,
            user_id: p.user_id,
            name: p.name,
            email: p.email,
        }
    }
}

/// Dialog position of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    SigninPrompted,
    CodePending,
    Authenticated,
}

/// Everything the bot remembers about one conversation.
///
/// Exclusively owned by its conversation: the router processes turns for a
/// given conversation one at a time, so no locking happens here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAuthState {
    pub state: AuthState,
    pub login_data: Option<LoginData>,
    pub user_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Failed magic-code entries since the last callback delivery.
    pub code_attempts: u32,
}

impl ConversationAuthState {
    /// The authenticated predicate: all three of user name, access token and
    /// refresh token present. Never evaluated on a subset.
    pub fn is_authenticated(&self) -> bool {
        self.user_name.is_some() && self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// Stash a freshly delivered sign-in payload. Last write wins: only the
    /// most recent pending pair can be validated by the next code entry.
    pub fn set_pending_login(&mut self, login: LoginData) {
        self.login_data = Some(login);
        self.code_attempts = 0;
    }

    /// Promote the pending tokens into live credentials, consuming the
    /// pending copy so the magic code cannot be validated twice.
    ///
    /// Returns `false` (leaving state untouched) when nothing is pending.
    pub fn promote_pending_login(&mut self) -> bool {
        match self.login_data.take() {
            Some(login) => {
                self.access_token = Some(login.access_token);
                self.refresh_token = Some(login.refresh_token);
                self.user_name = Some(login.name);
                self.code_attempts = 0;
                true
            }
            None => false,
        }
    }

    /// Logout: drop pending login, user name and both tokens.
    pub fn clear_credentials(&mut self) {
        self.login_data = None;
        self.user_name = None;
        self.access_token = None;
        self.refresh_token = None;
        self.code_attempts = 0;
    }
}

/// Conversation state store, keyed by conversation id.
///
/// Durable backends (table storage in the original deployment) implement
/// this; the bot only ever reads and writes whole entries.
pub trait StateStore {
    fn get(&self, conversation_id: &str) -> Option<ConversationAuthState>;
    fn put(&mut self, conversation_id: &str, state: ConversationAuthState);
    fn remove(&mut self, conversation_id: &str);
}

/// In-memory store used by the console transport and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: HashMap<String, ConversationAuthState>,
}

impl StateStore for MemoryStateStore {
    fn get(&self, conversation_id: &str) -> Option<ConversationAuthState> {
        self.entries.get(conversation_id).cloned()
    }

    fn put(&mut self, conversation_id: &str, state: ConversationAuthState) {
        self.entries.insert(conversation_id.to_string(), state);
    }

    fn remove(&mut self, conversation_id: &str) {
        self.entries.remove(conversation_id);
    }
}
