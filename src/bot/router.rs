//! Per-conversation sequential turn dispatch
//!
//! One unbounded channel and one task per conversation: every inbound turn
//! (including any token refresh and API retry it triggers) is processed to
//! completion before the next turn of the same conversation starts.
//! Conversations run concurrently with each other. The out-of-band sign-in
//! callback enters through the same channel, so it never bypasses the
//! sequential guarantee.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::api::MailClient;
use crate::auth::{ConversationAuthState, StateStore, TokenRefresher, TurnDelivery};

use super::machine::{AuthStateMachine, TurnAction, TurnReply};
use super::runner::AuthenticatedActionRunner;

/// Outbound reply for the transport to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub conversation_id: String,
    pub text: String,
}

struct Inner<R, S> {
    machine: AuthStateMachine,
    refresh: R,
    mail: MailClient,
    store: tokio::sync::Mutex<S>,
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    outbound: mpsc::UnboundedSender<OutboundReply>,
}

/// Routes inbound turns to per-conversation worker tasks.
pub struct ConversationRouter<R, S> {
    inner: Arc<Inner<R, S>>,
}

impl<R, S> Clone for ConversationRouter<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, S> ConversationRouter<R, S>
where
    R: TokenRefresher + Send + Sync + 'static,
    S: StateStore + Send + 'static,
{
    /// Build the router and the outbound reply stream the transport reads.
    pub fn new(
        machine: AuthStateMachine,
        refresh: R,
        mail: MailClient,
        store: S,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundReply>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let router = Self {
            inner: Arc::new(Inner {
                machine,
                refresh,
                mail,
                store: tokio::sync::Mutex::new(store),
                channels: Mutex::new(HashMap::new()),
                outbound,
            }),
        };
        (router, outbound_rx)
    }

    /// Queue an inbound turn. Turns for one conversation are delivered in
    /// order to its worker; a worker that has ended is respawned, so a
    /// "quit" followed by a new message starts a fresh activation.
    pub fn submit(&self, conversation_id: &str, text: String) {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if let Some(tx) = channels.get(conversation_id) {
            match tx.send(text) {
                Ok(()) => return,
                Err(mpsc::error::SendError(text)) => {
                    // Worker ended; replace it below.
                    channels.remove(conversation_id);
                    let tx = self.spawn_worker(&mut channels, conversation_id);
                    let _ = tx.send(text);
                    return;
                }
            }
        }

        let tx = self.spawn_worker(&mut channels, conversation_id);
        let _ = tx.send(text);
    }

    fn spawn_worker(
        &self,
        channels: &mut HashMap<String, mpsc::UnboundedSender<String>>,
        conversation_id: &str,
    ) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        channels.insert(conversation_id.to_string(), tx.clone());
        tokio::spawn(conversation_worker(
            Arc::clone(&self.inner),
            conversation_id.to_string(),
            rx,
        ));
        tx
    }
}

/// The sign-in callback injects its payload like any other inbound turn.
impl<R, S> TurnDelivery for ConversationRouter<R, S>
where
    R: TokenRefresher + Send + Sync + 'static,
    S: StateStore + Send + 'static,
{
    fn deliver(&self, conversation_id: &str, text: String) -> Result<()> {
        self.submit(conversation_id, text);
        Ok(())
    }
}

/// Owns one conversation's state for the lifetime of its activation and
/// processes its turns strictly in order.
async fn conversation_worker<R, S>(
    inner: Arc<Inner<R, S>>,
    conversation_id: String,
    mut turns: mpsc::UnboundedReceiver<String>,
) where
    R: TokenRefresher + Send + Sync,
    S: StateStore + Send,
{
    let mut state = {
        let store = inner.store.lock().await;
        store.get(&conversation_id).unwrap_or_default()
    };

    while let Some(text) = turns.recv().await {
        let ended = process_turn(&inner, &conversation_id, &mut state, &text).await;

        {
            let mut store = inner.store.lock().await;
            store.put(&conversation_id, state.clone());
        }

        if ended {
            // Stop accepting new turns; the next submit respawns a fresh
            // worker. Turns already queued still drain here so nothing the
            // user sent is dropped.
            tracing::debug!("conversation {} session ended", conversation_id);
            turns.close();
        }
    }
}

/// Run one turn to completion, including any downstream action it requests.
/// Returns true when the session ended.
async fn process_turn<R, S>(
    inner: &Inner<R, S>,
    conversation_id: &str,
    state: &mut ConversationAuthState,
    text: &str,
) -> bool
where
    R: TokenRefresher + Send + Sync,
    S: StateStore + Send,
{
    let reply = inner.machine.handle_turn(conversation_id, state, text);
    let action = reply.action;
    send_replies(inner, conversation_id, reply);

    match action {
        TurnAction::None => false,
        TurnAction::EndSession => true,
        TurnAction::FetchLatest => {
            let runner = AuthenticatedActionRunner::new(&inner.refresh);
            let mail = &inner.mail;
            let result = runner
                .call_with_auth(state, |token| async move {
                    mail.latest_message(&token).await.map(|m| m.subject)
                })
                .await;

            let follow = inner.machine.fetch_result(state, result);
            let ended = follow.action == TurnAction::EndSession;
            send_replies(inner, conversation_id, follow);
            ended
        }
    }
}

fn send_replies<R, S>(inner: &Inner<R, S>, conversation_id: &str, reply: TurnReply) {
    for text in reply.replies {
        let _ = inner.outbound.send(OutboundReply {
            conversation_id: conversation_id.to_string(),
            text,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AuthState, CallbackBinder, MemoryStateStore, ProviderConfig, RefreshProtocol,
        SignInCorrelation, SignInLinkIssuer, SignInProfile,
    };
    use crate::bot::machine::Messages;

    fn router() -> (
        ConversationRouter<RefreshProtocol, MemoryStateStore>,
        mpsc::UnboundedReceiver<OutboundReply>,
    ) {
        let provider = ProviderConfig {
            callback_host: "https://authbot.example.com".into(),
            ..Default::default()
        };
        let machine = AuthStateMachine::new(
            SignInLinkIssuer::new(&provider).unwrap(),
            Messages::default(),
            3,
        );
        ConversationRouter::new(
            machine,
            RefreshProtocol::new(&provider),
            MailClient::new(),
            MemoryStateStore::default(),
        )
    }

    async fn recv_text(rx: &mut mpsc::UnboundedReceiver<OutboundReply>) -> OutboundReply {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn test_first_turn_produces_signin_prompt() {
        let (router, mut rx) = router();
        router.submit("conv-1", "hello".into());

        let welcome = recv_text(&mut rx).await;
        assert_eq!(welcome.conversation_id, "conv-1");
        assert!(welcome.text.contains("Welcome!"));

        let link = recv_text(&mut rx).await;
        assert!(link.text.contains("/login?address="));

        let prompt = recv_text(&mut rx).await;
        assert!(prompt.text.contains("sign into your account"));
    }

    #[tokio::test]
    async fn test_turns_for_one_conversation_stay_ordered() {
        let (router, mut rx) = router();
        router.submit("conv-1", "hello".into());
        router.submit("conv-1", "still here".into());

        // Welcome, link, prompt from the first turn, then the re-prompt
        // from the second. Interleaving would break this order.
        let mut texts = Vec::new();
        for _ in 0..4 {
            texts.push(recv_text(&mut rx).await.text);
        }
        assert!(texts[0].contains("Welcome!"));
        assert_eq!(texts[3], "please click the signin link.");
    }

    #[tokio::test]
    async fn test_callback_injection_authenticates_end_to_end() {
        let (router, mut rx) = router();
        router.submit("conv-1", "hello".into());
        for _ in 0..3 {
            recv_text(&mut rx).await;
        }

        // Out-of-band: the provider redirect fires and the binder injects
        // the payload through the router.
        let binder = CallbackBinder::new(router.clone());
        let correlation = SignInCorrelation::for_conversation("conv-1");
        let code = binder
            .bind(
                &correlation,
                SignInProfile {
                    user_id: "u1".into(),
                    name: "Jo".into(),
                    email: "jo@example.com".into(),
                },
                "tokA".into(),
                "refA".into(),
            )
            .unwrap();

        let prompt = recv_text(&mut rx).await;
        assert!(prompt.text.contains("enter the code"));

        router.submit("conv-1", code);
        let menu = recv_text(&mut rx).await;
        assert!(menu.text.contains("Welcome Jo!"));

        // The store now holds authenticated state for the conversation.
        let state = {
            let store = router.inner.store.lock().await;
            store.get("conv-1").unwrap()
        };
        assert_eq!(state.state, AuthState::Authenticated);
        assert_eq!(state.access_token.as_deref(), Some("tokA"));
    }

    #[tokio::test]
    async fn test_session_restarts_after_quit() {
        let (router, mut rx) = router();
        router.submit("conv-1", "hello".into());
        for _ in 0..3 {
            recv_text(&mut rx).await;
        }
        router.submit("conv-1", r#"{"magicCode":"ab12","accessToken":"tokA","refreshToken":"refA","userId":"u1","name":"Jo","email":"e"}"#.into());
        recv_text(&mut rx).await; // code prompt
        router.submit("conv-1", "quit".into());
        let bye = recv_text(&mut rx).await;
        assert_eq!(bye.text, "Goodbye.");

        // A new message respawns the worker and starts a fresh activation.
        router.submit("conv-1", "hello again".into());
        let welcome = recv_text(&mut rx).await;
        assert!(welcome.text.contains("Welcome!"));
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let (router, mut rx) = router();
        router.submit("conv-a", "hi".into());
        router.submit("conv-b", "hi".into());

        let mut per_conv: HashMap<String, Vec<String>> = HashMap::new();
        for _ in 0..6 {
            let reply = recv_text(&mut rx).await;
            per_conv.entry(reply.conversation_id).or_default().push(reply.text);
        }

        for id in ["conv-a", "conv-b"] {
            let texts = &per_conv[id];
            assert_eq!(texts.len(), 3, "conversation {} replies", id);
            assert!(texts[0].contains("Welcome!"));
        }
    }
}
