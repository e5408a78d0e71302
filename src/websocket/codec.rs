//! WebSocket codec for use with tokio_util::codec::Framed.
//!
//! This codec turns a buffered byte stream into a stream of
//! [`StreamEvent`]s. It shares the frame decoder and message assembly with
//! the connection driver, so the two behave identically.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{WebSocketError, WebSocketFrame};
use super::message::Message;
use super::stream::MessageStream;
use crate::types::CloseReason;

/// Something the peer sent that the application may act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A complete text or binary message
    Message(Message),
    /// A ping and its payload
    Ping(Bytes),
    /// A pong and its payload
    Pong(Bytes),
    /// The peer's close frame
    Close(CloseReason),
}

/// WebSocket codec that implements tokio_util's Decoder and Encoder traits.
///
/// Decoding yields one event per completed message or control frame.
/// A protocol violation is returned as an error; the caller is expected to
/// answer it with a close frame carrying
/// [`WebSocketError::close_code`].
pub struct WebSocketCodec {
    stream: MessageStream,
    pending: VecDeque<StreamEvent>,
    close_seen: bool,
}

impl WebSocketCodec {
    /// Create a new WebSocket codec.
    pub fn new() -> Self {
        Self::with_max_payload_size(crate::websocket::DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a codec rejecting frames larger than `max_payload_size`.
    pub fn with_max_payload_size(max_payload_size: u64) -> Self {
        Self {
            stream: MessageStream::new(max_payload_size),
            pending: VecDeque::new(),
            close_seen: false,
        }
    }

    fn collect_events(&mut self) -> Result<(), WebSocketError> {
        if let Some(err) = self.stream.drain_errors().next() {
            return Err(err);
        }

        if !self.close_seen {
            if let Some(close) = self.stream.closing() {
                self.close_seen = true;
                self.pending.push_back(StreamEvent::Close(close.clone()));
            }
        }
        if let Some(message) = self.stream.take_message() {
            self.pending.push_back(StreamEvent::Message(message));
        }
        let pings: Vec<Bytes> = self.stream.drain_pings().collect();
        self.pending.extend(pings.into_iter().map(StreamEvent::Ping));
        let pongs: Vec<Bytes> = self.stream.drain_pongs().collect();
        self.pending.extend(pongs.into_iter().map(StreamEvent::Pong));
        Ok(())
    }
}

impl Default for WebSocketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WebSocketCodec {
    type Item = StreamEvent;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if src.is_empty() {
                // Need more data
                return Ok(None);
            }

            let want = self.stream.next_read_size().min(src.len());
            let chunk = src.split_to(want);
            self.stream.feed(&chunk)?;
            self.collect_events()?;
        }
    }
}

impl Encoder<WebSocketFrame> for WebSocketCodec {
    type Error = WebSocketError;

    fn encode(&mut self, frame: WebSocketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // No masking for server->client frames
        frame.encode_into(dst, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::close_code;

    #[test]
    fn test_decode_single_frame() {
        let mut codec = WebSocketCodec::new();

        // Create a simple text frame
        let frame = WebSocketFrame::new_text("Hello", true);
        let encoded = frame.encode(None);

        let mut buffer = BytesMut::from(&encoded[..]);
        let decoded = codec.decode(&mut buffer).unwrap();

        match decoded {
            Some(StreamEvent::Message(message)) => {
                assert!(message.completed());
                assert_eq!(message.as_text(), Some("Hello"));
            }
            other => panic!("expected a message, got {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_fragmented_message() {
        let mut codec = WebSocketCodec::new();

        // First fragment
        let frame1 = WebSocketFrame::new_text("Hel", false);
        let mut buffer = BytesMut::from(&frame1.encode(None)[..]);
        let result = codec.decode(&mut buffer).unwrap();
        assert!(result.is_none()); // Not complete yet

        // Second fragment (continuation)
        let frame2 = WebSocketFrame::new_continuation(&b"lo"[..], true);
        buffer.extend_from_slice(&frame2.encode(None));
        let result = codec.decode(&mut buffer).unwrap();

        assert_eq!(result, Some(StreamEvent::Message(completed_text("Hello"))));
    }

    #[test]
    fn test_decode_partial_buffer() {
        let mut codec = WebSocketCodec::new();
        let encoded = WebSocketFrame::new_binary(vec![1u8, 2, 3], true).encode(None);

        let mut buffer = BytesMut::from(&encoded[..3]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&encoded[3..]);
        match codec.decode(&mut buffer).unwrap() {
            Some(StreamEvent::Message(message)) => assert_eq!(message.data(), &[1, 2, 3]),
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_frame() {
        let mut codec = WebSocketCodec::new();
        let mut buffer = BytesMut::new();

        let frame = WebSocketFrame::new_binary(vec![1u8, 2, 3], true);
        codec.encode(frame, &mut buffer).unwrap();

        assert!(!buffer.is_empty());

        // Decode it back to verify
        let mut decode_codec = WebSocketCodec::new();
        match decode_codec.decode(&mut buffer).unwrap() {
            Some(StreamEvent::Message(message)) => {
                assert!(message.is_binary());
                assert_eq!(message.data(), &[1, 2, 3]);
            }
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_control_frames_between_fragments() {
        let mut codec = WebSocketCodec::new();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&WebSocketFrame::new_text("Hel", false).encode(None));
        buffer.extend_from_slice(&WebSocketFrame::new_ping(&b"test"[..]).encode(None));
        buffer.extend_from_slice(&WebSocketFrame::new_continuation(&b"lo"[..], true).encode(None));
        buffer.extend_from_slice(&WebSocketFrame::new_close(Some(1000), None).encode(None));

        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(StreamEvent::Ping(Bytes::from_static(b"test")))
        );
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(StreamEvent::Message(completed_text("Hello")))
        );
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(StreamEvent::Close(CloseReason::normal()))
        );
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_protocol_violation_is_an_error() {
        let mut codec = WebSocketCodec::new();
        let mut buffer = BytesMut::from(&[0x80u8, 0x00][..]);

        let err = codec.decode(&mut buffer).unwrap_err();
        assert_eq!(err.close_code(), close_code::PROTOCOL_ERROR);
    }

    fn completed_text(text: &str) -> Message {
        let mut message = Message::text(text);
        message.set_completed(true);
        message
    }
}
