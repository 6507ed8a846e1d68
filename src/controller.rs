use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::client::{ChatBackend, TransportError};
use crate::session::{ConversationState, Message, MessageId};
use crate::typing::{clean_answer, reveal_frames};

pub const WELCOME_TEXT: &str =
    "Hello! I'm your news chatbot. Ask me anything about recent news and current events.";
pub const CLEARED_TEXT: &str = "Session cleared! How can I help you today?";
pub const FALLBACK_TEXT: &str = "Sorry, I encountered an error. Please try again.";
pub const CONNECT_ERROR_TEXT: &str = "Cannot connect to server. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    EmptyQuery,
    NoSession,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Nothing was touched.
    Skipped(Skip),
    /// The message is also recorded as `last_error`.
    Failed(String),
    /// Abandoned because a reset took over.
    Cancelled,
}

pub struct ConversationController {
    backend: Arc<dyn ChatBackend>,
    typing_pause: Duration,
    state: watch::Sender<ConversationState>,
    op_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

/// Holds the operation lock and keeps `is_loading` raised until dropped.
struct Busy<'a> {
    state: &'a watch::Sender<ConversationState>,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.is_loading = false);
    }
}

impl ConversationController {
    pub fn new(backend: Arc<dyn ChatBackend>, typing_pause: Duration) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self {
            backend,
            typing_pause,
            state,
            op_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    fn begin<'a>(&'a self, lock: MutexGuard<'a, ()>) -> Busy<'a> {
        self.state.send_modify(|s| s.is_loading = true);
        Busy { state: &self.state, _lock: lock }
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record_error(&self, message: String) {
        self.state.send_modify(|s| s.last_error = Some(message));
    }

    /// Checks the service and updates the connection flag.
    pub async fn check_connection(&self) -> bool {
        match self.backend.health_check().await {
            Ok(()) => {
                self.state.send_modify(|s| s.is_connected = true);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "backend connection failed");
                self.state.send_modify(|s| {
                    s.is_connected = false;
                    s.last_error = Some(CONNECT_ERROR_TEXT.into());
                });
                false
            }
        }
    }

    pub async fn initialize_session(&self) -> Outcome {
        let Ok(lock) = self.op_lock.try_lock() else {
            return Outcome::Skipped(Skip::Busy);
        };
        let _busy = self.begin(lock);
        let token = self.current_token();
        self.initialize_locked(&token).await
    }

    async fn initialize_locked(&self, token: &CancellationToken) -> Outcome {
        let connected = tokio::select! {
            _ = token.cancelled() => return Outcome::Cancelled,
            connected = self.check_connection() => connected,
        };
        if !connected {
            return Outcome::Failed(CONNECT_ERROR_TEXT.into());
        }

        let created = tokio::select! {
            _ = token.cancelled() => return Outcome::Cancelled,
            created = self.backend.create_session() => created,
        };
        match created {
            Ok(session_id) => {
                tracing::info!(%session_id, "session created");
                self.state.send_modify(|s| {
                    s.session_id = Some(session_id);
                    s.messages = vec![Message::bot(WELCOME_TEXT)];
                });
                Outcome::Completed
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize session");
                let message = e.to_string();
                self.record_error(message.clone());
                Outcome::Failed(message)
            }
        }
    }

    pub async fn send_message(&self, query: &str) -> Outcome {
        let query = query.trim();
        if query.is_empty() {
            return Outcome::Skipped(Skip::EmptyQuery);
        }
        let Ok(lock) = self.op_lock.try_lock() else {
            return Outcome::Skipped(Skip::Busy);
        };
        let Some(session_id) = self.state.borrow().session_id.clone() else {
            return Outcome::Skipped(Skip::NoSession);
        };
        let _busy = self.begin(lock);
        let token = self.current_token();

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id().clone();
        self.state.send_modify(|s| {
            s.last_error = None;
            s.push(Message::user(query));
            s.push(placeholder);
        });

        let answer = tokio::select! {
            _ = token.cancelled() => {
                self.remove(&placeholder_id);
                return Outcome::Cancelled;
            }
            res = self.backend.ask(&session_id, query) => res,
        };

        match answer {
            Ok(answer) => {
                self.remove(&placeholder_id);
                self.reveal(&answer, &token).await
            }
            Err(e) => {
                tracing::error!(%session_id, error = %e, "failed to send message");
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.remove(&placeholder_id);
                    s.push(Message::bot(FALLBACK_TEXT));
                    s.last_error = Some(message.clone());
                });
                Outcome::Failed(message)
            }
        }
    }

    fn remove(&self, id: &MessageId) {
        self.state.send_modify(|s| {
            if !s.remove(id) {
                tracing::warn!(message_id = %id, "message to remove was already gone");
            }
        });
    }

    /// Appends a bot message and reveals the cleaned answer into it one
    /// character at a time.
    pub async fn simulate_typing(&self, answer: &str) -> Outcome {
        let Ok(lock) = self.op_lock.try_lock() else {
            return Outcome::Skipped(Skip::Busy);
        };
        let _busy = self.begin(lock);
        let token = self.current_token();
        self.reveal(answer, &token).await
    }

    async fn reveal(&self, answer: &str, token: &CancellationToken) -> Outcome {
        let cleaned = clean_answer(answer);
        let message = Message::bot("");
        let id = message.id().clone();
        self.state.send_modify(|s| s.push(message));

        let mut frames = reveal_frames(&cleaned).peekable();
        while let Some(frame) = frames.next() {
            self.state.send_modify(|s| {
                s.set_text(&id, frame);
            });
            if frames.peek().is_none() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(message_id = %id, "reveal abandoned");
                    return Outcome::Cancelled;
                }
                _ = tokio::time::sleep(self.typing_pause) => {}
            }
        }
        Outcome::Completed
    }

    pub async fn clear_session(&self) -> Outcome {
        let Ok(lock) = self.op_lock.try_lock() else {
            return Outcome::Skipped(Skip::Busy);
        };
        let Some(session_id) = self.state.borrow().session_id.clone() else {
            return Outcome::Skipped(Skip::NoSession);
        };
        let _busy = self.begin(lock);
        let token = self.current_token();

        let cleared = tokio::select! {
            _ = token.cancelled() => return Outcome::Cancelled,
            cleared = self.backend.clear_session(&session_id) => cleared,
        };
        match cleared {
            Ok(()) => {
                tracing::info!(%session_id, "session cleared");
                self.state.send_modify(|s| s.messages = vec![Message::bot(CLEARED_TEXT)]);
                Outcome::Completed
            }
            Err(e) => {
                tracing::error!(%session_id, error = %e, "failed to clear session");
                let message = e.to_string();
                self.record_error(message.clone());
                Outcome::Failed(message)
            }
        }
    }

    /// Abandons whatever is in flight, drops the current session and starts
    /// over. Destroying the old session is best effort.
    pub async fn reset_session(&self) -> Outcome {
        self.current_token().cancel();
        let lock = self.op_lock.lock().await;
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        let _busy = self.begin(lock);

        let previous = self.state.borrow().session_id.clone();
        if let Some(session_id) = previous {
            let destroyed = tokio::select! {
                _ = token.cancelled() => return Outcome::Cancelled,
                destroyed = self.backend.destroy_session(&session_id) => destroyed,
            };
            if let Err(e) = destroyed {
                tracing::warn!(%session_id, error = %e, "failed to destroy previous session");
            }
        }

        self.state.send_modify(|s| {
            s.session_id = None;
            s.messages.clear();
            s.last_error = None;
        });
        self.initialize_locked(&token).await
    }

    /// Server-side history of the active session, if there is one.
    pub async fn history(&self) -> Result<Option<Value>, TransportError> {
        let Some(session_id) = self.state.borrow().session_id.clone() else {
            return Ok(None);
        };
        self.backend.history(&session_id).await.map(Some)
    }
}
