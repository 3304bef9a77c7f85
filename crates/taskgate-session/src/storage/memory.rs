//! In-memory task history.

use std::sync::RwLock;

use async_trait::async_trait;
use taskgate_core::{HistoryError, TaskData, TaskHistory, TaskRecord};
use uuid::Uuid;

use super::{HistoryState, RECENT_DIRS_LIMIT};

/// In-memory history implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryHistory {
    state: RwLock<HistoryState>,
    recent_limit: usize,
}

impl MemoryHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::with_recent_limit(RECENT_DIRS_LIMIT)
    }

    /// Create an empty history keeping `limit` recent directories.
    #[must_use]
    pub fn with_recent_limit(limit: usize) -> Self {
        Self {
            state: RwLock::new(HistoryState::default()),
            recent_limit: limit,
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHistory for MemoryHistory {
    async fn record(&self, task: &TaskData) -> Result<TaskRecord, HistoryError> {
        Ok(self
            .state
            .write()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .record(task, self.recent_limit))
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, HistoryError> {
        Ok(self
            .state
            .read()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .get(id))
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, HistoryError> {
        Ok(self
            .state
            .read()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .list(limit))
    }

    async fn remove(&self, id: Uuid) -> Result<(), HistoryError> {
        let removed = self
            .state
            .write()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .remove(id);

        if removed {
            Ok(())
        } else {
            Err(HistoryError::NotFound(id))
        }
    }

    async fn recent_base_dirs(&self) -> Result<Vec<String>, HistoryError> {
        Ok(self
            .state
            .read()
            .map_err(|e| HistoryError::Internal(e.to_string()))?
            .recent_dirs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_lookup() {
        let history = MemoryHistory::new();
        let mut task = TaskData::new("/proj", "Rename a to b\nthen tidy up");
        task.temperature = 0.2;

        let record = history.record(&task).await.unwrap();
        assert_eq!(record.title, "Rename a to b");
        assert!((record.temperature - 0.2).abs() < f32::EPSILON);

        let fetched = history.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(history.recent_base_dirs().await.unwrap(), vec!["/proj"]);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let history = MemoryHistory::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            history.remove(id).await,
            Err(HistoryError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let history = MemoryHistory::with_recent_limit(2);
        for dir in ["/a", "/b", "/c"] {
            history.record(&TaskData::new(dir, "x")).await.unwrap();
        }
        assert_eq!(history.recent_base_dirs().await.unwrap(), vec!["/c", "/b"]);
        assert_eq!(history.list(None).await.unwrap().len(), 3);
    }
}
