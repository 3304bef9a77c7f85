//! In-process transport bridge.
//!
//! Lets an embedding application (a terminal front end, a test harness) talk
//! to the same connection loop the WebSocket uses, without serializing.

use std::sync::Arc;

use futures::StreamExt;
use taskgate_core::{ConnectionId, EventSender, TaskData};
use taskgate_session::ConnectionRegistry;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    connection::serve,
    protocol::{AnswerPayload, ClientMessage, DecisionPayload, ServerMessage},
};

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
}

/// Client side of an in-process connection.
pub struct LocalClient {
    connection_id: ConnectionId,
    client_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl LocalClient {
    /// Open a connection on `registry`.
    ///
    /// Returns the client and the handle of the spawned connection loop,
    /// which finishes once the client closes.
    #[must_use]
    pub fn connect(registry: Arc<ConnectionRegistry>) -> (Self, JoinHandle<()>) {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (events, server_rx) = EventSender::channel();
        let connection_id = events.connection_id();

        let inbound = UnboundedReceiverStream::new(client_rx).map(Ok);
        let handle = tokio::spawn(async move {
            serve(&registry, events, inbound).await;
        });

        let client = Self {
            connection_id,
            client_tx: Some(client_tx),
            server_rx,
        };
        (client, handle)
    }

    /// Connection id assigned by the server side.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Send a message to the server.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub fn send(&self, msg: ClientMessage) -> Result<(), SendError> {
        self.client_tx
            .as_ref()
            .ok_or(SendError::ChannelClosed)?
            .send(msg)
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Start a task.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub fn start_task(&self, task: TaskData) -> Result<(), SendError> {
        self.send(ClientMessage::StartTask(task))
    }

    /// Answer the pending confirmation.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub fn confirm(&self, decision: DecisionPayload) -> Result<(), SendError> {
        self.send(ClientMessage::confirmation(decision))
    }

    /// Answer the pending question.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub fn answer(&self, answer: AnswerPayload) -> Result<(), SendError> {
        self.send(ClientMessage::QuestionResponse { answer })
    }

    /// Close the client-to-server direction.
    ///
    /// The server treats this as a disconnect. Events already emitted, and
    /// any emitted while the session winds down, can still be received.
    pub fn close(&mut self) {
        self.client_tx = None;
    }

    /// Receive the next server message.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.server_rx.recv().await
    }

    /// Receive a server message (non-blocking).
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.server_rx.try_recv().ok()
    }

    /// Receive messages up to and including the next terminal one.
    ///
    /// Stops early if the server side is gone.
    pub async fn recv_until_terminal(&mut self) -> Vec<ServerMessage> {
        let mut seen = Vec::new();
        while let Some(msg) = self.recv().await {
            let terminal = msg.is_terminal();
            seen.push(msg);
            if terminal {
                break;
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use taskgate_executor::{TaskContext, TaskWork, WorkError};

    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskWork for Echo {
        async fn run(&self, ctx: TaskContext) -> Result<String, WorkError> {
            Ok(ctx.task().prompt.clone())
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_bridge() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(Echo)));
        let (mut client, handle) = LocalClient::connect(Arc::clone(&registry));

        client.send(ClientMessage::Ping).unwrap();
        assert_eq!(client.recv().await, Some(ServerMessage::Pong));

        client.start_task(TaskData::new("/proj", "hello")).unwrap();
        let seen = client.recv_until_terminal().await;
        assert_eq!(
            seen,
            vec![
                ServerMessage::TaskRunning,
                ServerMessage::TaskComplete {
                    message: "hello".into()
                }
            ]
        );

        client.close();
        assert!(matches!(
            client.send(ClientMessage::Ping),
            Err(SendError::ChannelClosed)
        ));
        handle.await.unwrap();
        assert!(registry.is_empty().await);
    }
}
