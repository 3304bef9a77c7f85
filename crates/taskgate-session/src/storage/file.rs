//! Task history kept in a JSON file (feature-gated).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use taskgate_core::{HistoryError, TaskData, TaskHistory, TaskRecord};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{HistoryState, RECENT_DIRS_LIMIT};

/// History persisted as a single JSON document, rewritten on each change.
///
/// A change is only applied in memory once the file write succeeded.
pub struct JsonFileHistory {
    path: PathBuf,
    state: Mutex<HistoryState>,
    recent_limit: usize,
}

impl JsonFileHistory {
    /// Open the history at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HistoryState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
            recent_limit: RECENT_DIRS_LIMIT,
        })
    }

    /// Keep `limit` recent directories.
    #[must_use]
    pub const fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// File backing this history.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &HistoryState) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHistory for JsonFileHistory {
    async fn record(&self, task: &TaskData) -> Result<TaskRecord, HistoryError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let record = next.record(task, self.recent_limit);
        self.persist(&next).await?;
        *state = next;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, HistoryError> {
        Ok(self.state.lock().await.get(id))
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, HistoryError> {
        Ok(self.state.lock().await.list(limit))
    }

    async fn remove(&self, id: Uuid) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if !next.remove(id) {
            return Err(HistoryError::NotFound(id));
        }
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn recent_base_dirs(&self) -> Result<Vec<String>, HistoryError> {
        Ok(self.state.lock().await.recent_dirs())
    }
}
