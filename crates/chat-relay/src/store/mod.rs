//! Session persistence contract and reference stores.
//!
//! The relay only needs [`SessionStore::load`] and
//! [`SessionStore::append_message`]. The bundled stores add the session
//! bookkeeping a front end needs (create, list, clear).

mod file;
mod memory;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;

use crate::errors::StoreError;
use crate::model::{Message, SessionId};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const DEFAULT_CATEGORY: &str = "Instant Chat";

/// Durable read/append access to a conversation's messages.
///
/// At most one turn may be in flight per session; callers serialize turns.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the session's messages, oldest first.
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;

    /// Appends one message at the end of the session.
    async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), StoreError>;
}

/// A stored session document.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub category: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionRecord {
    /// Creates an empty session; blank title or category fall back to defaults.
    pub fn new(title: Option<&str>, category: Option<&str>) -> Self {
        Self {
            id: SessionId::generate(),
            title: non_blank(title).unwrap_or(DEFAULT_TITLE).to_string(),
            category: non_blank(category).unwrap_or(DEFAULT_CATEGORY).to_string(),
            created_at: chrono::Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry for a session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn newest_first(mut sessions: Vec<SessionSummary>) -> Vec<SessionSummary> {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_title_uses_default() {
        let record = SessionRecord::new(Some("  "), None);
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.category, DEFAULT_CATEGORY);
        assert!(record.messages.is_empty());
    }

    #[test]
    fn record_without_messages_field_deserializes() {
        let record: SessionRecord = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "title": "t",
            "category": "c",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .expect("deserialize");
        assert!(record.messages.is_empty());
        assert_eq!(record.id, SessionId::new("abc"));
    }
}
