//! Transport layer for interactive task sessions.
//!
//! Provides:
//! - Wire protocol (tagged JSON frames)
//! - Connection loop shared by all transports
//! - In-process bridge for embedding and tests
//! - WebSocket, upload and history routes (feature: websocket)

pub mod connection;
pub mod local;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod routes;
#[cfg(feature = "websocket")]
pub mod upload;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{handle_message, serve};
pub use local::{LocalClient, SendError};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};

#[cfg(feature = "websocket")]
pub use routes::create_router;
#[cfg(feature = "websocket")]
pub use upload::{UploadError, UploadStore};
