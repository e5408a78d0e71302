//! Messages exchanged with the application.
//!
//! A [`Message`] is a complete (possibly reassembled) text or binary
//! payload. [`ControlMessage`] covers close, ping and pong.

use bytes::{Bytes, BytesMut};

use super::frame::{MAX_CONTROL_PAYLOAD, WebSocketError, WebSocketFrame, WebSocketOpcode};
use crate::types::CloseReason;

/// Kind of data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text
    Text,
    /// Arbitrary bytes
    Binary,
}

impl MessageKind {
    /// Opcode used by the first frame of a message of this kind.
    pub fn opcode(self) -> WebSocketOpcode {
        match self {
            MessageKind::Text => WebSocketOpcode::Text,
            MessageKind::Binary => WebSocketOpcode::Binary,
        }
    }
}

/// A text or binary message.
///
/// While a fragmented message is being received the stream keeps
/// appending to `data`; `completed` flips once the final fragment arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    data: BytesMut,
    completed: bool,
}

impl Message {
    /// Create a message of the given kind.
    pub fn new(kind: MessageKind, data: impl AsRef<[u8]>) -> Self {
        Message {
            kind,
            data: BytesMut::from(data.as_ref()),
            completed: false,
        }
    }

    /// Create a text message.
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::new(MessageKind::Text, text.as_ref())
    }

    /// Create a binary message.
    pub fn binary(data: impl AsRef<[u8]>) -> Self {
        Self::new(MessageKind::Binary, data)
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        self.kind == MessageKind::Binary
    }

    /// Whether the final fragment has been received.
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }

    /// Raw payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload as text. `None` for binary messages or invalid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        if !self.is_text() {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }

    /// Append a chunk to the payload.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Take ownership of the payload.
    pub fn into_data(self) -> Bytes {
        self.data.freeze()
    }

    /// Wire bytes of this message as one unfragmented frame.
    pub fn single(&self) -> Bytes {
        WebSocketFrame::new(self.kind.opcode(), self.data.clone().freeze(), true).encode(None)
    }

    /// Wire bytes of this message as one fragment of a larger message.
    ///
    /// Only the first fragment carries the message opcode; the others are
    /// continuation frames. Only the last one has FIN set.
    pub fn fragment(&self, first: bool, last: bool) -> Bytes {
        let opcode = if first {
            self.kind.opcode()
        } else {
            WebSocketOpcode::Continuation
        };
        WebSocketFrame::new(opcode, self.data.clone().freeze(), last).encode(None)
    }
}

/// Control messages: never fragmented, payload of at most 125 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Close with status code and reason
    Close(CloseReason),
    /// Ping with application data
    Ping(Bytes),
    /// Pong with application data
    Pong(Bytes),
}

impl ControlMessage {
    /// Wire bytes of this control message.
    pub fn single(&self) -> Bytes {
        self.to_frame().encode(None)
    }

    /// Check the payload fits in a control frame. Close reasons are
    /// truncated when encoded, so only pings and pongs can be too long.
    pub fn validate(&self) -> Result<(), WebSocketError> {
        let len = match self {
            ControlMessage::Close(_) => return Ok(()),
            ControlMessage::Ping(data) | ControlMessage::Pong(data) => data.len(),
        };
        if len as u64 > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ProtocolError(format!(
                "control payload of {} bytes exceeds {}",
                len, MAX_CONTROL_PAYLOAD
            )));
        }
        Ok(())
    }

    pub(crate) fn to_frame(&self) -> WebSocketFrame {
        match self {
            ControlMessage::Close(close) => {
                WebSocketFrame::new_close(Some(close.code), Some(&close.reason))
            }
            ControlMessage::Ping(data) => WebSocketFrame::new_ping(data.clone()),
            ControlMessage::Pong(data) => WebSocketFrame::new_pong(data.clone()),
        }
    }
}
