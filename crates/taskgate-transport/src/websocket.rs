//! WebSocket transport for browser clients.

use std::{future, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use taskgate_core::EventSender;
use taskgate_session::ConnectionRegistry;

use crate::{connection::serve, protocol::ClientMessage};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Connection registry shared by all sockets.
    pub registry: Arc<ConnectionRegistry>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, receiver) = socket.split();
    let (events, mut rx) = EventSender::channel();
    let connection_id = events.connection_id();
    tracing::info!(connection = %connection_id, "WebSocket connected");

    // Single writer keeps server events in emission order.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let inbound = receiver
        .take_while(move |frame| {
            let open = match frame {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(connection = %connection_id, "WebSocket error: {e}");
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(ClientMessage::parse(text.as_str())),
                Ok(Message::Binary(data)) => Some(ClientMessage::parse_bytes(&data)),
                _ => None,
            })
        });

    serve(&state.registry, events, inbound).await;

    send_task.abort();
    tracing::info!(connection = %connection_id, "WebSocket disconnected");
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(registry));
/// ```
#[must_use]
pub fn create_ws_router(registry: Arc<ConnectionRegistry>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState::new(registry))
}
