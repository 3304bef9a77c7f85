//! Session state and task history storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{TaskData, now_millis};

/// Session identifier.
pub type SessionId = Uuid;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started.
    Idle,
    /// Work is executing.
    Running,
    /// Suspended on a confirmation request.
    AwaitingConfirmation,
    /// Suspended on a question.
    AwaitingQuestion,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Errored,
}

impl SessionStatus {
    /// Completed or Errored.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// Running or suspended on an interaction.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::AwaitingConfirmation | Self::AwaitingQuestion
        )
    }

    /// Suspended on a confirmation or a question.
    #[must_use]
    pub const fn is_awaiting(self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::AwaitingQuestion)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// The only cycles are Running <-> AwaitingConfirmation and
    /// Running <-> AwaitingQuestion.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running | Self::Errored)
                | (
                    Self::Running,
                    Self::AwaitingConfirmation
                        | Self::AwaitingQuestion
                        | Self::Completed
                        | Self::Errored
                )
                | (
                    Self::AwaitingConfirmation | Self::AwaitingQuestion,
                    Self::Running | Self::Errored
                )
        )
    }
}

/// Illegal status change.
#[derive(Debug, Clone, Error)]
#[error("Invalid session transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub base_dir: String,
    pub original_prompt: String,
    pub continue_context: bool,
    pub temperature: f32,
    pub status: SessionStatus,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// New idle session for `task`.
    #[must_use]
    pub fn new(task: &TaskData) -> Self {
        let timestamp = now_millis();
        Self {
            id: Uuid::new_v4(),
            base_dir: task.base_dir.clone(),
            original_prompt: task.prompt.clone(),
            continue_context: task.continue_context,
            temperature: task.temperature,
            status: SessionStatus::Idle,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// # Errors
    /// Returns error on an illegal transition; the status is left unchanged.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now_millis();
        Ok(())
    }
}

/// A previously submitted task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    pub base_dir: String,
    pub prompt: String,
    pub continue_context: bool,
    pub temperature: f32,
    pub title: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl TaskRecord {
    /// Record for `task`, titled from its prompt.
    #[must_use]
    pub fn from_task(task: &TaskData) -> Self {
        Self {
            id: Uuid::new_v4(),
            base_dir: task.base_dir.clone(),
            prompt: task.prompt.clone(),
            continue_context: task.continue_context,
            temperature: task.temperature,
            title: task.title(),
            created_at: now_millis(),
        }
    }
}

/// History error.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Task record not found: {0}")]
    NotFound(Uuid),
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("History format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("History error: {0}")]
    Internal(String),
}

/// Store of prior task definitions and recently used base directories.
#[async_trait]
pub trait TaskHistory: Send + Sync {
    /// Save `task` and bump its base directory to the front of the recent list.
    async fn record(&self, task: &TaskData) -> Result<TaskRecord, HistoryError>;

    /// Get a record by ID.
    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, HistoryError>;

    /// Records, newest first.
    async fn list(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, HistoryError>;

    /// Delete a record.
    async fn remove(&self, id: Uuid) -> Result<(), HistoryError>;

    /// Most recently used base directories, newest first.
    async fn recent_base_dirs(&self) -> Result<Vec<String>, HistoryError>;
}
