//! Server-to-client events and the ordered outbound channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ChangeEntry;

/// Identifier of one transport connection.
pub type ConnectionId = Uuid;

/// Severity/category of a log line shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Marker carried by a single-entry context update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// A new entry was appended to the ledger.
    EntryAdded,
    /// A replay of earlier entries follows.
    Resuming,
}

/// Payload of a `context-update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextUpdate {
    /// Full ledger contents, sent on resumption.
    Bulk { changes: Vec<ChangeEntry> },
    /// One appended entry, or the resuming marker.
    Single {
        kind: UpdateKind,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry: Option<ChangeEntry>,
    },
}

/// Event sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Progress line.
    Log {
        message: String,
        log_type: LogKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_action: Option<bool>,
    },
    /// Ledger change notification.
    ContextUpdate(ContextUpdate),
    /// The task wants approval for an operation.
    ConfirmationRequest {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    /// The task wants an answer from the user.
    AskQuestionRequest { question: String, allows_yes_no: bool },
    /// A task has started running.
    TaskRunning,
    /// The task finished successfully.
    TaskComplete { message: String },
    /// The task failed.
    TaskError { message: String },
    /// Keepalive reply.
    Pong,
}

impl ServerEvent {
    /// Plain log line.
    #[must_use]
    pub fn log(message: impl Into<String>, log_type: LogKind) -> Self {
        Self::Log {
            message: message.into(),
            log_type,
            is_action: None,
        }
    }

    /// Whether this event ends a task.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskComplete { .. } | Self::TaskError { .. })
    }
}

/// Transport error.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Ordered sender for one connection's outbound events.
///
/// Every component that talks to a client (gate, ledger, controller) sends
/// through a clone of the same sender, so the client observes events in the
/// order they were produced.
#[derive(Debug, Clone)]
pub struct EventSender {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl EventSender {
    /// Wrap an existing channel.
    #[must_use]
    pub const fn new(connection_id: ConnectionId, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { connection_id, tx }
    }

    /// Create a sender with a fresh connection id and its receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Uuid::new_v4(), tx), rx)
    }

    /// Connection this sender belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event for delivery.
    ///
    /// # Errors
    /// Returns error if the connection's writer has gone away.
    pub fn send(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .map_err(|_| TransportError::Closed(self.connection_id))
    }

    /// Queue a log line, ignoring delivery failure.
    pub fn log(&self, message: impl Into<String>, log_type: LogKind) {
        if self.send(ServerEvent::log(message, log_type)).is_err() {
            tracing::debug!(connection = %self.connection_id, "Dropped log line for closed connection");
        }
    }

    /// Whether the receiving end has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeKind, ChangePaths};

    #[test]
    fn test_event_wire_names() {
        let json = serde_json::to_value(ServerEvent::TaskRunning).unwrap();
        assert_eq!(json, serde_json::json!({"type": "task-running"}));

        let json = serde_json::to_value(ServerEvent::AskQuestionRequest {
            question: "Which file?".into(),
            allows_yes_no: false,
        })
        .unwrap();
        assert_eq!(json["type"], "ask-question-request");
        assert_eq!(json["allowsYesNo"], false);

        let json = serde_json::to_value(ServerEvent::log("hi", LogKind::Warning)).unwrap();
        assert_eq!(json["logType"], "warning");
        assert!(json.get("isAction").is_none());
    }

    #[test]
    fn test_context_update_shapes() {
        let entry = ChangeEntry {
            ordinal: 1,
            kind: ChangeKind::ReadFile,
            paths: ChangePaths::single("a.rs"),
            timestamp: 1,
        };
        let bulk = ServerEvent::ContextUpdate(ContextUpdate::Bulk {
            changes: vec![entry.clone()],
        });
        let json = serde_json::to_value(&bulk).unwrap();
        assert_eq!(json["type"], "context-update");
        assert_eq!(json["changes"][0]["ordinal"], 1);
        let parsed: ServerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bulk);

        let single = ServerEvent::ContextUpdate(ContextUpdate::Single {
            kind: UpdateKind::EntryAdded,
            text: entry.describe(),
            entry: Some(entry),
        });
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["kind"], "entry-added");
        assert_eq!(json["text"], "Read file a.rs");
        let parsed: ServerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, single);
    }

    #[test]
    fn test_sender_reports_closed_connection() {
        let (sender, rx) = EventSender::channel();
        assert!(sender.send(ServerEvent::Pong).is_ok());
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(ServerEvent::Pong),
            Err(TransportError::Closed(id)) if id == sender.connection_id()
        ));
    }
}
