//! Wire protocol for client-server communication.
//!
//! Frames are JSON objects tagged by `"type"`; server events are the
//! [`ServerEvent`](taskgate_core::ServerEvent) values re-exported here as
//! [`ServerMessage`].

use serde::{Deserialize, Serialize};
use taskgate_core::{TaskData, TaskValidationError};
use taskgate_executor::{Answer, ButtonChoice, Decision};
use thiserror::Error;

pub use taskgate_core::ServerEvent as ServerMessage;

/// Decision carried by a confirmation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionPayload {
    Yes,
    No,
    YesAll,
    Disconnect,
}

/// Yes/no button value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonPayload {
    Yes,
    No,
}

/// Answer carried by a question response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AnswerPayload {
    Text(String),
    Button(ButtonPayload),
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Start a task.
    StartTask(TaskData),
    /// Answer to a confirmation request.
    ConfirmationResponse {
        confirmed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decision: Option<DecisionPayload>,
    },
    /// Answer to a question.
    QuestionResponse { answer: AnswerPayload },
    /// Ping for keepalive.
    Ping,
}

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Message is not valid UTF-8")]
    NotUtf8,
    #[error("Invalid start-task: {0}")]
    InvalidTask(#[from] TaskValidationError),
    #[error("Confirmation says confirmed={confirmed} but decision is {decision:?}")]
    InconsistentDecision {
        confirmed: bool,
        decision: DecisionPayload,
    },
}

impl ClientMessage {
    /// Parse and validate a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a well-formed, self-consistent message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(text)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    /// Returns error if the bytes are not UTF-8 or not a valid message.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        std::str::from_utf8(data)
            .map_err(|_| ProtocolError::NotUtf8)
            .and_then(Self::parse)
    }

    /// Check payload constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::StartTask(task) => Ok(task.validate()?),
            Self::ConfirmationResponse {
                confirmed,
                decision,
            } => resolve_decision(*confirmed, *decision).map(|_| ()),
            Self::QuestionResponse { .. } | Self::Ping => Ok(()),
        }
    }

    /// Confirmation response with an explicit decision.
    #[must_use]
    pub const fn confirmation(decision: DecisionPayload) -> Self {
        Self::ConfirmationResponse {
            confirmed: matches!(decision, DecisionPayload::Yes | DecisionPayload::YesAll),
            decision: Some(decision),
        }
    }
}

/// Decision the gate should apply for a confirmation response.
///
/// Without an explicit decision, `confirmed` picks yes or no.
///
/// # Errors
/// Returns error if `confirmed` contradicts the decision.
pub fn resolve_decision(
    confirmed: bool,
    decision: Option<DecisionPayload>,
) -> Result<Decision, ProtocolError> {
    let resolved = match (confirmed, decision) {
        (true, None | Some(DecisionPayload::Yes)) => Decision::Yes,
        (true, Some(DecisionPayload::YesAll)) => Decision::YesAll,
        (false, None | Some(DecisionPayload::No)) => Decision::No,
        (_, Some(DecisionPayload::Disconnect)) => Decision::Disconnected,
        (confirmed, Some(decision)) => {
            return Err(ProtocolError::InconsistentDecision {
                confirmed,
                decision,
            });
        }
    };
    Ok(resolved)
}

impl From<AnswerPayload> for Answer {
    fn from(payload: AnswerPayload) -> Self {
        match payload {
            AnswerPayload::Text(value) => Self::Text(value),
            AnswerPayload::Button(ButtonPayload::Yes) => Self::Button(ButtonChoice::Yes),
            AnswerPayload::Button(ButtonPayload::No) => Self::Button(ButtonChoice::No),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_task() {
        let msg = ClientMessage::parse(
            r#"{"type":"start-task","baseDir":"/proj","prompt":"rename a to b",
                "continueContext":false,"temperature":0.5,"uploadedFiles":["x.png"]}"#,
        )
        .unwrap();
        let ClientMessage::StartTask(task) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(task.base_dir, "/proj");
        assert_eq!(task.uploaded_files, vec!["x.png"]);
    }

    #[test]
    fn test_invalid_start_task_is_rejected() {
        let err = ClientMessage::parse(r#"{"type":"start-task","baseDir":"","prompt":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTask(TaskValidationError::EmptyBaseDir)));

        let err = ClientMessage::parse(r#"{"type":"start-task","prompt":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_parse_confirmation_response() {
        let msg = ClientMessage::parse(
            r#"{"type":"confirmation-response","confirmed":true,"decision":"yes-all"}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::confirmation(DecisionPayload::YesAll));
    }

    #[test]
    fn test_decision_resolution() {
        assert_eq!(resolve_decision(true, None).unwrap(), Decision::Yes);
        assert_eq!(resolve_decision(false, None).unwrap(), Decision::No);
        assert_eq!(
            resolve_decision(false, Some(DecisionPayload::Disconnect)).unwrap(),
            Decision::Disconnected
        );
        assert!(matches!(
            resolve_decision(true, Some(DecisionPayload::No)),
            Err(ProtocolError::InconsistentDecision { .. })
        ));
        assert!(resolve_decision(false, Some(DecisionPayload::YesAll)).is_err());
    }

    #[test]
    fn test_parse_question_response() {
        let msg = ClientMessage::parse(
            r#"{"type":"question-response","answer":{"kind":"button","value":"no"}}"#,
        )
        .unwrap();
        let ClientMessage::QuestionResponse { answer } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(Answer::from(answer), Answer::Button(ButtonChoice::No));

        let msg = ClientMessage::parse(
            r#"{"type":"question-response","answer":{"kind":"text","value":"src/lib.rs"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::QuestionResponse { answer: AnswerPayload::Text(ref v) } if v == "src/lib.rs"
        ));
    }

    #[test]
    fn test_unknown_type_and_bad_bytes() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"resize","cols":80}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
        assert_eq!(
            ClientMessage::parse_bytes(br#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }
}
