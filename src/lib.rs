//! Embeddable RFC 6455 WebSocket engine.
//!
//! The crate takes over a transport once the HTTP upgrade is done. It decodes
//! frames incrementally, assembles fragmented messages, validates text as
//! UTF-8 across fragments, answers pings and close frames, and hands complete
//! messages to a [`WebSocketHandler`].

#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![warn(missing_docs)]

pub mod handler;
pub mod types;

/// WebSocket framing, message assembly and connection driver
pub mod websocket;

pub use handler::{EchoHandler, WebSocketHandler};
pub use types::{CloseReason, WebSocketConfig};
pub use websocket::{
    ControlMessage, Message, MessageKind, Payload, StreamEvent, WebSocket, WebSocketCodec,
    WebSocketConnection, WebSocketError, WebSocketFrame, WebSocketOpcode, close_code,
};
