//! Chat sessions and their message history.
//!
//! Sessions are kept most-recent-first. The "current view" is not a second
//! copy of the messages: it is read straight from the current session's
//! record, so an append can never reach one projection and miss the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique session identifier (opaque, time-ordered).
pub type SessionId = String;

/// Title a session carries until its first message arrives.
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl ChatMessage {
    pub fn new(sender: Sender, content: impl Into<String>, status: Option<Status>) -> Self {
        Self {
            id: time_ordered_id(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: time_ordered_id(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() == 1 {
            self.title = derive_title(&self.messages[0].content);
        }
    }
}

/// First 30 characters of `content` followed by `...`.
pub fn derive_title(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_CHARS).collect();
    title.push_str("...");
    title
}

fn time_ordered_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// In-memory store: all sessions plus which one is current.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    current: Option<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session, put it first, and make it current; returns its id.
    pub fn create_session(&mut self) -> SessionId {
        let session = Session::new();
        let id = session.id.clone();
        log::debug!("created session {}", id);
        self.sessions.insert(0, session);
        self.current = Some(id.clone());
        id
    }

    /// Make `id` current. Unknown ids are ignored; returns whether the switch happened.
    pub fn select_session(&mut self, id: &str) -> bool {
        if self.sessions.iter().any(|s| s.id == id) {
            self.current = Some(id.to_string());
            true
        } else {
            log::debug!("select_session: unknown session {}", id);
            false
        }
    }

    /// Append a message to the current session, creating one first if there
    /// is no current session or it is no longer in the collection.
    pub fn append_message(
        &mut self,
        sender: Sender,
        content: impl Into<String>,
        status: Option<Status>,
    ) -> &ChatMessage {
        let index = match self.current_index() {
            Some(i) => i,
            None => {
                self.create_session();
                0
            }
        };
        let session = &mut self.sessions[index];
        session.push(ChatMessage::new(sender, content, status));
        &session.messages[session.messages.len() - 1]
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current_index().map(|i| &self.sessions[i])
    }

    /// Messages of the current session; empty when there is none.
    pub fn current_messages(&self) -> &[ChatMessage] {
        self.current().map(|s| s.messages.as_slice()).unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn message_count(&self) -> usize {
        self.sessions.iter().map(|s| s.messages.len()).sum()
    }

    fn current_index(&self) -> Option<usize> {
        let id = self.current.as_deref()?;
        self.sessions.iter().position(|s| s.id == id)
    }

    #[cfg(test)]
    fn remove_for_test(&mut self, id: &str) {
        self.sessions.retain(|s| s.id != id);
    }
}
