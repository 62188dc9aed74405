use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::StoreError;
use crate::model::{Message, SessionId};

use super::{SessionRecord, SessionStore, SessionSummary, newest_first};

/// Process-local session store.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, title: Option<&str>, category: Option<&str>) -> SessionRecord {
        let record = SessionRecord::new(title, category);
        self.sessions.insert(record.id.clone(), record.clone());
        record
    }

    /// Inserts or replaces a whole record.
    pub fn insert(&self, record: SessionRecord) {
        self.sessions.insert(record.id.clone(), record);
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        newest_first(self.sessions.iter().map(|e| e.summary()).collect())
    }

    pub fn clear(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))?;
        entry.messages.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))?;
        entry.messages.push(message);
        Ok(())
    }
}
