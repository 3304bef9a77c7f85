//! Connection loop shared by every transport.
//!
//! A transport turns its frames into a stream of parsed [`ClientMessage`]s
//! and provides an [`EventSender`] for the way back; [`serve`] does the rest.

use futures::{Stream, StreamExt};
use taskgate_core::{EventSender, LogKind, ServerEvent};
use taskgate_session::{ConnectionRegistry, SessionController};

use crate::protocol::{resolve_decision, ClientMessage, ProtocolError};

/// Drive one connection until its inbound stream ends.
///
/// The controller is registered before the first message is read and
/// disposed of after the last, which cancels any pending interaction.
pub async fn serve<S>(registry: &ConnectionRegistry, events: EventSender, inbound: S)
where
    S: Stream<Item = Result<ClientMessage, ProtocolError>> + Send,
{
    let connection_id = events.connection_id();
    let controller = registry.connect(events.clone()).await;

    let mut inbound = std::pin::pin!(inbound);
    while let Some(next) = inbound.next().await {
        match next {
            Ok(msg) => handle_message(&controller, &events, msg).await,
            Err(e) => reject(&events, &e),
        }
    }

    registry.disconnect(connection_id).await;
    tracing::debug!(connection = %connection_id, "Connection loop finished");
}

/// Apply one client message to the connection's controller.
///
/// Failures are reported to the client as a single error log event.
pub async fn handle_message(controller: &SessionController, events: &EventSender, msg: ClientMessage) {
    let result = match msg {
        ClientMessage::Ping => {
            // Nobody to answer if the client just left.
            let _ = events.send(ServerEvent::Pong);
            return;
        }
        ClientMessage::StartTask(task) => controller.start(task).await.map(|session_id| {
            tracing::debug!(connection = %events.connection_id(), session = %session_id, "Task accepted");
        }),
        ClientMessage::ConfirmationResponse {
            confirmed,
            decision,
        } => match resolve_decision(confirmed, decision) {
            Ok(decision) => controller.confirm(decision),
            Err(e) => {
                reject(events, &e);
                return;
            }
        },
        ClientMessage::QuestionResponse { answer } => controller.answer(answer.into()),
    };

    if let Err(e) = result {
        tracing::warn!(connection = %events.connection_id(), "Rejected client message: {e}");
        events.log(e.to_string(), LogKind::Error);
    }
}

fn reject(events: &EventSender, error: &ProtocolError) {
    tracing::warn!(connection = %events.connection_id(), "Invalid client message: {error}");
    events.log(format!("Invalid message: {error}"), LogKind::Error);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use taskgate_core::{ChangeKind, ChangePaths, SessionStatus, TaskData};
    use taskgate_executor::{TaskContext, TaskWork, WorkError};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    struct TouchOne;

    #[async_trait]
    impl TaskWork for TouchOne {
        async fn run(&self, ctx: TaskContext) -> Result<String, WorkError> {
            ctx.record(ChangeKind::CreateFile, ChangePaths::single("notes.md"))?;
            Ok("done".into())
        }
    }

    fn error_logs(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Log { log_type: LogKind::Error, .. }))
            .count()
    }

    #[tokio::test]
    async fn test_ping_and_bad_frames() {
        let registry = ConnectionRegistry::new(Arc::new(TouchOne));
        let (events, mut rx) = EventSender::channel();

        let inbound = futures::stream::iter(vec![
            Ok(ClientMessage::Ping),
            ClientMessage::parse("{not json"),
            Ok(ClientMessage::ConfirmationResponse {
                confirmed: true,
                decision: None,
            }),
        ]);
        serve(&registry, events, inbound).await;

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events[0], ServerEvent::Pong);
        assert_eq!(error_logs(&events), 2, "one error per offending message");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_task_runs_to_completion_over_loop() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(TouchOne)));
        let (events, mut rx) = EventSender::channel();
        let connection_id = events.connection_id();
        let (tx, inbound) = mpsc::unbounded_channel();

        let server = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                serve(&registry, events, UnboundedReceiverStream::new(inbound).map(Ok)).await;
            })
        };

        tx.send(ClientMessage::StartTask(TaskData::new("/proj", "write notes")))
            .unwrap();
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        assert_eq!(seen.first(), Some(&ServerEvent::TaskRunning));
        assert_eq!(
            seen.last(),
            Some(&ServerEvent::TaskComplete {
                message: "done".into()
            })
        );

        let controller = registry.get(connection_id).await.unwrap();
        assert_eq!(controller.wait().await, Some(SessionStatus::Completed));

        drop(tx);
        server.await.unwrap();
        assert!(registry.get(connection_id).await.is_none());
    }
}
