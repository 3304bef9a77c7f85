//! Task history implementations.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use taskgate_core::{TaskData, TaskRecord};
use uuid::Uuid;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "json-file")]
pub mod file;

#[cfg(feature = "json-file")]
pub use file::JsonFileHistory;
#[cfg(feature = "memory")]
pub use memory::MemoryHistory;

/// Default length of the recent base directory list.
pub const RECENT_DIRS_LIMIT: usize = 10;

/// Records plus the bounded most-recently-used directory list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryState {
    records: Vec<TaskRecord>,
    recent_dirs: VecDeque<String>,
}

impl HistoryState {
    fn record(&mut self, task: &TaskData, limit: usize) -> TaskRecord {
        let record = TaskRecord::from_task(task);
        self.records.push(record.clone());

        let dir = task.base_dir.trim().to_string();
        self.recent_dirs.retain(|d| *d != dir);
        self.recent_dirs.push_front(dir);
        self.recent_dirs.truncate(limit);
        record
    }

    fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    fn list(&self, limit: Option<usize>) -> Vec<TaskRecord> {
        // Records are appended in creation order.
        let newest_first = self.records.iter().rev().cloned();
        match limit {
            Some(n) => newest_first.take(n).collect(),
            None => newest_first.collect(),
        }
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() != before
    }

    fn recent_dirs(&self) -> Vec<String> {
        self.recent_dirs.iter().cloned().collect()
    }
}
