use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque session identifier issued by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// `msg_<unix millis>_<9 random chars>`. Unique enough for one
    /// conversation; not meant to be globally unique.
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("msg_{}_{}", Utc::now().timestamp_millis(), suffix))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        id: MessageId,
        text: String,
        created_at: DateTime<Utc>,
    },
    Bot {
        id: MessageId,
        text: String,
        created_at: DateTime<Utc>,
        /// Typing placeholder; carries no text and never survives an operation.
        pending: bool,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            id: MessageId::generate(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Message::Bot {
            id: MessageId::generate(),
            text: text.into(),
            created_at: Utc::now(),
            pending: false,
        }
    }

    pub fn placeholder() -> Self {
        Message::Bot {
            id: MessageId::generate(),
            text: String::new(),
            created_at: Utc::now(),
            pending: true,
        }
    }

    pub fn id(&self) -> &MessageId {
        match self {
            Message::User { id, .. } | Message::Bot { id, .. } => id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Message::User { text, .. } | Message::Bot { text, .. } => text,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Message::User { created_at, .. } | Message::Bot { created_at, .. } => *created_at,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User { .. } => Role::User,
            Message::Bot { .. } => Role::Bot,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Message::Bot { pending: true, .. })
    }
}

/// Everything the controller owns. Observers only ever see clones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationState {
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_connected: bool,
    pub last_error: Option<String>,
}

impl ConversationState {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns false when nothing carried `id`.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id() != id);
        self.messages.len() != before
    }

    pub fn set_text(&mut self, id: &MessageId, new_text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id() == id) {
            Some(Message::User { text, .. }) | Some(Message::Bot { text, .. }) => {
                text.clear();
                text.push_str(new_text);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_prefixed() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        let raw = a.to_string();
        assert!(raw.starts_with("msg_"));
        let suffix = raw.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 9);
    }

    #[test]
    fn messages_serialize_with_role_tag() {
        let v = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["text"], "hi");

        let v = serde_json::to_value(Message::placeholder()).unwrap();
        assert_eq!(v["role"], "bot");
        assert_eq!(v["pending"], true);
    }

    #[test]
    fn remove_and_update_by_id() {
        let mut state = ConversationState::default();
        let user = Message::user("question");
        let pending = Message::placeholder();
        let pending_id = pending.id().clone();
        state.push(user.clone());
        state.push(pending);

        assert!(state.messages[1].is_pending());
        assert!(state.remove(&pending_id));
        assert!(!state.remove(&pending_id));
        assert_eq!(state.messages, vec![user.clone()]);

        assert!(state.set_text(user.id(), "edited"));
        assert_eq!(state.messages[0].text(), "edited");
        assert_eq!(state.messages[0].role(), Role::User);
    }
}
