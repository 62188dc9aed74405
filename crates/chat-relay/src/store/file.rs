use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::StoreError;
use crate::model::{Message, SessionId};

use super::{SessionRecord, SessionStore, SessionSummary, newest_first};

const RECORD_EXTENSION: &str = "json";

/// Stores each session as `<dir>/<session_id>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a half-written document behind.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn create_session(
        &self,
        title: Option<&str>,
        category: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        let record = SessionRecord::new(title, category);
        self.write_record(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<SessionRecord, StoreError> {
        let path = self.record_path(session_id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.clone()));
            }
            Err(e) => return Err(storage_err(&path, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            StoreError::Storage(format!("corrupt session file {}: {e}", path.display()))
        })
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_err(&self.dir, e))?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(&SessionId::new(stem)).await {
                Ok(record) => sessions.push(record.summary()),
                Err(err) => debug!(path = %path.display(), error = %err, "skipping unreadable session file"),
            }
        }
        Ok(newest_first(sessions))
    }

    pub async fn clear(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let mut record = self.get(session_id).await?;
        record.messages.clear();
        self.write_record(&record).await
    }

    fn record_path(&self, session_id: &SessionId) -> Result<PathBuf, StoreError> {
        let id = session_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::NotFound(session_id.clone()));
        }
        Ok(self.dir.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    async fn write_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id)?;
        let tmp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Storage(format!("failed to encode session: {e}")))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err(&path, e))
    }
}

#[async_trait::async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        Ok(self.get(session_id).await?.messages)
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), StoreError> {
        let mut record = self.get(session_id).await?;
        record.messages.push(message);
        self.write_record(&record).await
    }
}

fn storage_err(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Storage(format!("{}: {err}", path.display()))
}
