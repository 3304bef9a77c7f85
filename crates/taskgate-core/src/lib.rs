//! Core building blocks for interactive task sessions.
//!
//! This crate provides:
//! - `TaskData` - The validated start-task request
//! - `ChangeEntry` - Immutable record of one agent operation
//! - `Ledger` - Append-only, replayable change log with live broadcast
//! - `ServerEvent` / `EventSender` - Ordered outbound events for one connection
//! - Session state and task history traits

pub mod change;
pub mod event;
pub mod ledger;
pub mod task;
pub mod traits;

use std::time::{SystemTime, UNIX_EPOCH};

pub use change::{ChangeEntry, ChangeKind, ChangePaths};
pub use event::{ConnectionId, ContextUpdate, EventSender, LogKind, ServerEvent, TransportError, UpdateKind};
pub use ledger::{Ledger, LedgerError};
pub use task::{TaskData, TaskValidationError};
pub use traits::{
    HistoryError, Session, SessionId, SessionStatus, TaskHistory, TaskRecord, TransitionError,
};

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
