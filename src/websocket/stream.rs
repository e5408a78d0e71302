//! Message assembly on top of the frame decoder.
//!
//! [`MessageStream`] doesn't know about the transport. It tells its owner
//! how many bytes it wants next, gets fed those bytes, and classifies each
//! completed frame: data frames build up the current [`Message`], control
//! frames are queued, and protocol violations are queued as errors.

use std::collections::VecDeque;

use bytes::Bytes;

use super::frame::{Decode, FrameDecoder, WebSocketError, WebSocketFrame, WebSocketOpcode};
use super::message::{Message, MessageKind};
use crate::types::CloseReason;
use crate::websocket::DEFAULT_MAX_PAYLOAD_SIZE;

/// Incoming side of one WebSocket connection.
#[derive(Debug)]
pub struct MessageStream {
    decoder: FrameDecoder,
    max_payload_size: u64,
    message: Option<Message>,
    // Prefix of a text message's payload known to be valid UTF-8
    utf8_valid: usize,
    pings: VecDeque<Bytes>,
    pongs: VecDeque<Bytes>,
    closing: Option<CloseReason>,
    errors: VecDeque<WebSocketError>,
}

impl MessageStream {
    /// Create a stream accepting frame payloads up to `max_payload_size` bytes.
    pub fn new(max_payload_size: u64) -> Self {
        MessageStream {
            decoder: FrameDecoder::new(max_payload_size),
            max_payload_size,
            message: None,
            utf8_valid: 0,
            pings: VecDeque::new(),
            pongs: VecDeque::new(),
            closing: None,
            errors: VecDeque::new(),
        }
    }

    /// Number of bytes to read from the transport next. Never zero.
    pub fn next_read_size(&self) -> usize {
        self.decoder.remaining()
    }

    /// Feed bytes read from the transport.
    ///
    /// `chunk` must not be longer than [`next_read_size`](Self::next_read_size).
    /// Returns the size of the next read, or `Err(StreamClosed)` when an
    /// empty chunk signals the end of the transport. While an error is
    /// queued, input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<usize, WebSocketError> {
        if !self.errors.is_empty() {
            return Ok(self.next_read_size());
        }

        match self.decoder.feed(chunk) {
            Decode::NeedBytes(n) => return Ok(n),
            Decode::Ready(frame) => {
                self.reset_decoder();
                self.process(frame);
            }
            Decode::Failed(WebSocketError::StreamClosed) => {
                self.reset_decoder();
                return Err(WebSocketError::StreamClosed);
            }
            Decode::Failed(err) => {
                self.reset_decoder();
                self.fail(err);
            }
        }

        Ok(self.next_read_size())
    }

    fn reset_decoder(&mut self) {
        self.decoder = FrameDecoder::new(self.max_payload_size);
    }

    fn fail(&mut self, err: WebSocketError) {
        tracing::warn!("WebSocket stream violation: {}", err);
        self.message = None;
        self.errors.push_back(err);
    }

    fn process(&mut self, frame: WebSocketFrame) {
        match frame.opcode {
            WebSocketOpcode::Text | WebSocketOpcode::Binary => {
                if self.message.as_ref().is_some_and(|m| !m.completed()) {
                    self.fail(WebSocketError::ProtocolError(
                        "new data frame before the fragmented message completed".into(),
                    ));
                    return;
                }

                let kind = if frame.is_text() {
                    MessageKind::Text
                } else {
                    MessageKind::Binary
                };
                let mut message = Message::new(kind, &frame.payload);
                message.set_completed(frame.fin);

                self.utf8_valid = 0;
                if kind == MessageKind::Text {
                    match validate_utf8(message.data(), 0, frame.fin) {
                        Ok(valid) => self.utf8_valid = valid,
                        Err(err) => return self.fail(err),
                    }
                }
                self.message = Some(message);
            }
            WebSocketOpcode::Continuation => {
                let checked = self.utf8_valid;
                let outcome = match self.message.as_mut() {
                    Some(message) if !message.completed() => {
                        message.extend(&frame.payload);
                        message.set_completed(frame.fin);
                        if message.is_text() {
                            validate_utf8(message.data(), checked, frame.fin).map(Some)
                        } else {
                            Ok(None)
                        }
                    }
                    _ => Err(WebSocketError::ProtocolError(
                        "continuation frame without a message in progress".into(),
                    )),
                };

                match outcome {
                    Ok(Some(valid)) => self.utf8_valid = valid,
                    Ok(None) => {}
                    Err(err) => self.fail(err),
                }
            }
            WebSocketOpcode::Close => {
                if self.closing.is_none() {
                    let reason = match frame.parse_close_payload() {
                        Some((code, reason)) => CloseReason::new(code, reason),
                        None => CloseReason::normal(),
                    };
                    self.closing = Some(reason);
                }
            }
            WebSocketOpcode::Ping => self.pings.push_back(frame.payload),
            WebSocketOpcode::Pong => self.pongs.push_back(frame.payload),
            WebSocketOpcode::Reserved(op) => self.fail(WebSocketError::UnsupportedFrameType(op)),
        }
    }

    /// Whether a completed message is waiting.
    pub fn has_message(&self) -> bool {
        self.message.as_ref().is_some_and(Message::completed)
    }

    /// The message currently being assembled, completed or not.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Move the completed message out, clearing the slot.
    pub fn take_message(&mut self) -> Option<Message> {
        if self.has_message() {
            self.utf8_valid = 0;
            self.message.take()
        } else {
            None
        }
    }

    /// The close frame received from the peer, if any.
    pub fn closing(&self) -> Option<&CloseReason> {
        self.closing.as_ref()
    }

    /// Whether violations are waiting to be answered.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Drain queued violations, oldest first. Input is accepted again afterwards.
    ///
    /// Each one maps to the close code answering it through
    /// [`WebSocketError::close_code`].
    pub fn drain_errors(&mut self) -> impl Iterator<Item = WebSocketError> + '_ {
        self.errors.drain(..)
    }

    /// Drain received ping payloads in arrival order.
    pub fn drain_pings(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.pings.drain(..)
    }

    /// Drain received pong payloads in arrival order.
    pub fn drain_pongs(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.pongs.drain(..)
    }
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

/// Validate `data[checked..]`, returning the new valid prefix length.
///
/// A code point cut off at the end is accepted while more fragments are
/// expected; on the final fragment it is invalid.
fn validate_utf8(data: &[u8], checked: usize, fin: bool) -> Result<usize, WebSocketError> {
    match std::str::from_utf8(&data[checked..]) {
        Ok(_) => Ok(data.len()),
        Err(e) if e.error_len().is_none() && !fin => Ok(checked + e.valid_up_to()),
        Err(_) => Err(WebSocketError::InvalidPayload),
    }
}
