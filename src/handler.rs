//! Handler trait for WebSocket applications
//!
//! A connection calls into its [`WebSocketHandler`] from the connection's
//! own task, one callback at a time, in the order the frames completed on
//! the wire. Every callback gets the connection's [`WebSocket`] handle so
//! it can reply with [`WebSocket::send`] or end the session with
//! [`WebSocket::close`].
//!
//! # Examples
//!
//! ```
//! use ws_engine::{Message, WebSocket, WebSocketConnection, WebSocketHandler};
//!
//! struct ShoutHandler;
//!
//! impl WebSocketHandler for ShoutHandler {
//!     async fn received_message(&self, ws: &WebSocket, message: Message) {
//!         if let Some(text) = message.as_text() {
//!             let reply = text.to_uppercase();
//!             let _ = ws.send(reply).await;
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (server, _client) = tokio::io::duplex(1024);
//! let (ws, _task) = WebSocketConnection::new(server, ShoutHandler).spawn();
//! ws.close(1000, "done").await.unwrap();
//! assert!(ws.server_terminated());
//! # }
//! ```

use std::future::Future;

use bytes::Bytes;

use crate::websocket::{Message, Payload, WebSocket};

/// Callbacks a WebSocket application implements
///
/// Only [`received_message`](Self::received_message) is required; the other
/// callbacks default to doing nothing. Pings are answered by the connection
/// itself and never reach the handler.
pub trait WebSocketHandler: Send + Sync + 'static {
    /// Called once the connection task starts, before the first read
    fn opened(&self, _ws: &WebSocket) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called for every complete text or binary message
    fn received_message(
        &self,
        ws: &WebSocket,
        message: Message,
    ) -> impl Future<Output = ()> + Send;

    /// Called for every pong received from the peer
    fn ponged(&self, _ws: &WebSocket, _data: Bytes) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called once when the connection is finished
    ///
    /// `code` is the peer's close code, or 1006 when the connection ended
    /// without a close frame.
    fn closed(
        &self,
        _ws: &WebSocket,
        _code: u16,
        _reason: String,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Handler that sends every message back unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl WebSocketHandler for EchoHandler {
    async fn received_message(&self, ws: &WebSocket, message: Message) {
        if let Err(err) = ws.send(Payload::Message(message)).await {
            tracing::debug!("Echo reply dropped: {}", err);
        }
    }
}
