//! WebSocket protocol engine conforming to RFC 6455.
//!
//! This module provides frame parsing and encoding, message assembly and the
//! per-connection driver. The decoding layers are independent of any
//! transport; [`WebSocketConnection`] ties them to a tokio byte stream.

mod codec;
mod connection;
mod frame;
mod message;
mod stream;

pub use codec::{StreamEvent, WebSocketCodec};
pub use connection::{ChunkStream, Payload, WebSocket, WebSocketConnection};
pub use frame::{
    DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_READ_SIZE, Decode, FrameDecoder, MAX_CONTROL_PAYLOAD,
    WebSocketError, WebSocketFrame, WebSocketOpcode, close_code,
};
pub use message::{ControlMessage, Message, MessageKind};
pub use stream::MessageStream;
