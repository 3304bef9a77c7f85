//! Task definition submitted by a client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sampling temperature used when the client omits one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Upper bound accepted for `temperature`.
pub const MAX_TEMPERATURE: f32 = 2.0;

const TITLE_CHARS: usize = 60;

/// A task as requested by `start-task`.
///
/// `base_dir` is the key under which the change ledger is stored, so two
/// tasks against the same directory share (or reset) the same history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    /// Directory the agent operates in.
    pub base_dir: String,

    /// Instruction given to the agent.
    pub prompt: String,

    /// Adopt and replay the prior ledger for `base_dir` instead of resetting it.
    #[serde(default)]
    pub continue_context: bool,

    /// Sampling temperature forwarded to the work layer.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Reference names previously returned by the upload side channel.
    #[serde(default)]
    pub uploaded_files: Vec<String>,
}

const fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

/// Reasons a start-task payload is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskValidationError {
    #[error("baseDir must not be empty")]
    EmptyBaseDir,
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("temperature {0} is outside 0.0..={MAX_TEMPERATURE}")]
    Temperature(f32),
    #[error("invalid uploaded file reference: {0:?}")]
    UploadReference(String),
}

impl TaskData {
    /// Create a fresh (non-continuing) task with default settings.
    #[must_use]
    pub fn new(base_dir: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            prompt: prompt.into(),
            continue_context: false,
            temperature: DEFAULT_TEMPERATURE,
            uploaded_files: Vec::new(),
        }
    }

    /// Mark the task as continuing the prior ledger.
    #[must_use]
    pub const fn continuing(mut self) -> Self {
        self.continue_context = true;
        self
    }

    /// Check the payload before any session state is touched.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.base_dir.trim().is_empty() {
            return Err(TaskValidationError::EmptyBaseDir);
        }
        if self.prompt.trim().is_empty() {
            return Err(TaskValidationError::EmptyPrompt);
        }
        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(TaskValidationError::Temperature(self.temperature));
        }
        if let Some(bad) = self.uploaded_files.iter().find(|name| !is_plain_reference(name)) {
            return Err(TaskValidationError::UploadReference(bad.clone()));
        }
        Ok(())
    }

    /// Short display title derived from the first prompt line.
    #[must_use]
    pub fn title(&self) -> String {
        let first = self.prompt.lines().next().unwrap_or_default().trim();
        if first.chars().count() <= TITLE_CHARS {
            first.to_string()
        } else {
            let cut: String = first.chars().take(TITLE_CHARS).collect();
            format!("{}...", cut.trim_end())
        }
    }
}

// Upload references are bare file names; anything that could walk out of
// the upload directory is refused.
fn is_plain_reference(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_applies_defaults() {
        let task: TaskData =
            serde_json::from_str(r#"{"baseDir":"/proj","prompt":"rename a to b"}"#).unwrap();
        assert_eq!(task.base_dir, "/proj");
        assert!(!task.continue_context);
        assert!((task.temperature - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
        assert!(task.uploaded_files.is_empty());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert_eq!(
            TaskData::new("  ", "x").validate(),
            Err(TaskValidationError::EmptyBaseDir)
        );
        assert_eq!(
            TaskData::new("/proj", "\n").validate(),
            Err(TaskValidationError::EmptyPrompt)
        );
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut task = TaskData::new("/proj", "go");
        task.temperature = 2.5;
        assert!(matches!(task.validate(), Err(TaskValidationError::Temperature(_))));
        task.temperature = f32::NAN;
        assert!(task.validate().is_err());
        task.temperature = 0.0;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_validate_upload_references() {
        let mut task = TaskData::new("/proj", "go");
        task.uploaded_files = vec!["ok.txt".into(), "../etc/passwd".into()];
        assert_eq!(
            task.validate(),
            Err(TaskValidationError::UploadReference("../etc/passwd".into()))
        );
    }

    #[test]
    fn test_title_truncates_first_line() {
        let task = TaskData::new("/proj", "short title\nmore detail");
        assert_eq!(task.title(), "short title");

        let long = "x".repeat(100);
        let title = TaskData::new("/proj", long).title();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_CHARS + 3);
    }
}
