//! Change entries recorded by the ledger.

use serde::{Deserialize, Serialize};

/// Kind of operation an agent performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    CreateFile,
    UpdateFile,
    DeleteFile,
    CreateDirectory,
    DeleteDirectory,
    MoveItem,
    ReadFile,
    ListDirectory,
    SearchFiles,
    FileInfo,
}

impl ChangeKind {
    /// Whether the operation modifies the file system.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateFile
                | Self::UpdateFile
                | Self::DeleteFile
                | Self::CreateDirectory
                | Self::DeleteDirectory
                | Self::MoveItem
        )
    }

    /// Past-tense label used in context updates.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CreateFile => "Created file",
            Self::UpdateFile => "Updated file",
            Self::DeleteFile => "Deleted file",
            Self::CreateDirectory => "Created directory",
            Self::DeleteDirectory => "Deleted directory",
            Self::MoveItem => "Moved",
            Self::ReadFile => "Read file",
            Self::ListDirectory => "Listed directory",
            Self::SearchFiles => "Searched",
            Self::FileInfo => "Inspected",
        }
    }
}

/// Paths touched by an operation.
///
/// `MoveItem` carries a source and destination, every other kind a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangePaths {
    Move { source: String, destination: String },
    Single { path: String },
}

impl ChangePaths {
    /// Single-path shape.
    #[must_use]
    pub fn single(path: impl Into<String>) -> Self {
        Self::Single { path: path.into() }
    }

    /// Source + destination shape.
    #[must_use]
    pub fn moved(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::Move {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Whether this shape is the one `kind` requires.
    #[must_use]
    pub const fn fits(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::MoveItem => matches!(self, Self::Move { .. }),
            _ => matches!(self, Self::Single { .. }),
        }
    }
}

/// One immutable record of an agent operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Position in the ledger, starting at 1.
    pub ordinal: u64,
    pub kind: ChangeKind,
    pub paths: ChangePaths,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl ChangeEntry {
    /// Human readable one-liner, e.g. `Moved a -> b`.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.paths {
            ChangePaths::Single { path } => format!("{} {path}", self.kind.label()),
            ChangePaths::Move {
                source,
                destination,
            } => format!("{} {source} -> {destination}", self.kind.label()),
        }
    }
}
