//! WebSocket frame parsing and encoding conforming to RFC 6455.
//!
//! Decoding is incremental: a [`FrameDecoder`] is fed byte chunks and reports
//! how many more bytes it needs until a complete [`WebSocketFrame`] is
//! available. It never reads from a transport itself.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Close status codes produced by this engine (RFC 6455 Section 7.4.1).
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// The peer violated the framing or fragmentation rules.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// The peer sent a frame type this endpoint cannot accept.
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// A frame declared a payload larger than the configured maximum.
    pub const FRAME_TOO_LARGE: u16 = 1004;
    /// The connection ended without a close frame being observed.
    pub const ABNORMAL: u16 = 1006;
    /// A text payload was not valid UTF-8.
    pub const INVALID_PAYLOAD: u16 = 1007;

    /// Whether a peer-supplied code may be sent back in a close frame.
    ///
    /// 1005, 1006 and 1015 only exist as local notifications, and codes
    /// below 1000 or in the unassigned ranges are never valid on the wire.
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Bytes requested by a fresh decoder: enough for the fixed header.
pub const DEFAULT_READ_SIZE: usize = 2;

/// Default limit on a single frame's declared payload length (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketOpcode {
    /// Continuation frame (0x0)
    Continuation,
    /// Text data frame (0x1)
    Text,
    /// Binary data frame (0x2)
    Binary,
    /// Connection close frame (0x8)
    Close,
    /// Ping frame (0x9)
    Ping,
    /// Pong frame (0xA)
    Pong,
    /// Reserved non-control opcode (0x3 - 0x7)
    Reserved(u8),
}

impl WebSocketOpcode {
    /// Parse opcode from 4-bit value.
    ///
    /// Reserved control opcodes (0xB - 0xF) are rejected outright since a
    /// receiver cannot know whether they obey control-frame rules.
    fn from_u8(value: u8) -> Result<Self, WebSocketError> {
        match value {
            0x0 => Ok(WebSocketOpcode::Continuation),
            0x1 => Ok(WebSocketOpcode::Text),
            0x2 => Ok(WebSocketOpcode::Binary),
            0x3..=0x7 => Ok(WebSocketOpcode::Reserved(value)),
            0x8 => Ok(WebSocketOpcode::Close),
            0x9 => Ok(WebSocketOpcode::Ping),
            0xA => Ok(WebSocketOpcode::Pong),
            _ => Err(WebSocketError::ProtocolError(format!(
                "reserved control opcode {:#x}",
                value
            ))),
        }
    }

    /// The 4-bit wire value of this opcode.
    pub fn as_u8(self) -> u8 {
        match self {
            WebSocketOpcode::Continuation => 0x0,
            WebSocketOpcode::Text => 0x1,
            WebSocketOpcode::Binary => 0x2,
            WebSocketOpcode::Close => 0x8,
            WebSocketOpcode::Ping => 0x9,
            WebSocketOpcode::Pong => 0xA,
            WebSocketOpcode::Reserved(value) => value & 0x0F,
        }
    }

    /// Check if this is a control frame opcode.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            WebSocketOpcode::Close | WebSocketOpcode::Ping | WebSocketOpcode::Pong
        )
    }

}

/// Errors raised while decoding frames, reassembling messages or talking
/// to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketError {
    /// Framing or fragmentation rules were violated
    ProtocolError(String),
    /// Declared payload length exceeds the configured maximum
    FrameTooLarge(u64),
    /// More bytes were supplied than the decoder asked for
    InvalidBytes,
    /// The transport delivered no bytes while more were required
    StreamClosed,
    /// Frame type this endpoint does not handle
    UnsupportedFrameType(u8),
    /// Invalid UTF-8 in a text message
    InvalidPayload,
    /// I/O error
    IoError(String),
}

impl WebSocketError {
    /// The close code used to answer this error on the wire.
    pub fn close_code(&self) -> u16 {
        match self {
            WebSocketError::ProtocolError(_) | WebSocketError::InvalidBytes => {
                close_code::PROTOCOL_ERROR
            }
            WebSocketError::FrameTooLarge(_) => close_code::FRAME_TOO_LARGE,
            WebSocketError::UnsupportedFrameType(_) => close_code::UNSUPPORTED_DATA,
            WebSocketError::InvalidPayload => close_code::INVALID_PAYLOAD,
            WebSocketError::StreamClosed | WebSocketError::IoError(_) => close_code::ABNORMAL,
        }
    }
}

impl fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebSocketError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            WebSocketError::FrameTooLarge(len) => {
                write!(f, "Frame payload of {} bytes is too large", len)
            }
            WebSocketError::InvalidBytes => write!(f, "Received more bytes than requested"),
            WebSocketError::StreamClosed => write!(f, "Stream closed"),
            WebSocketError::UnsupportedFrameType(op) => {
                write!(f, "Unsupported frame type: {:#x}", op)
            }
            WebSocketError::InvalidPayload => write!(f, "Invalid UTF-8 in text message"),
            WebSocketError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for WebSocketError {}

impl From<std::io::Error> for WebSocketError {
    fn from(err: std::io::Error) -> Self {
        WebSocketError::IoError(err.to_string())
    }
}

/// WebSocket frame structure per RFC 6455 Section 5.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketFrame {
    /// FIN bit: indicates this is the final fragment of a message
    pub fin: bool,
    /// RSV1 bit: reserved for extensions
    pub rsv1: bool,
    /// RSV2 bit: reserved for extensions
    pub rsv2: bool,
    /// RSV3 bit: reserved for extensions
    pub rsv3: bool,
    /// Opcode: identifies the frame type
    pub opcode: WebSocketOpcode,
    /// Mask bit: indicates if payload was masked on the wire
    pub masked: bool,
    /// Masking key read from the wire, if any
    pub mask_key: Option<[u8; 4]>,
    /// Payload data, already unmasked
    pub payload: Bytes,
}

impl WebSocketFrame {
    /// Encode a WebSocket frame to bytes.
    ///
    /// Frames written by the server side are never masked; a masking key is
    /// only passed when acting as a client (or when building client frames
    /// in tests).
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut dst = BytesMut::with_capacity(14 + self.payload.len());
        self.encode_into(&mut dst, mask);
        dst.freeze()
    }

    /// Encode this frame at the end of `dst`.
    ///
    /// # RFC 6455 Frame Format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
    /// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
    /// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
    /// | |1|2|3|       |K|             |                               |
    /// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
    /// |     Extended payload length continued, if payload len == 127  |
    /// + - - - - - - - - - - - - - - - +-------------------------------+
    /// |                               |Masking-key, if MASK set to 1  |
    /// +-------------------------------+-------------------------------+
    /// | Masking-key (continued)       |          Payload Data         |
    /// +-------------------------------- - - - - - - - - - - - - - - - +
    /// :                     Payload Data continued ...                :
    /// + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
    /// |                     Payload Data continued ...                |
    /// +---------------------------------------------------------------+
    /// ```
    pub fn encode_into(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        // First byte: FIN, RSV1-3, Opcode
        let mut byte1 = self.opcode.as_u8();
        if self.fin {
            byte1 |= 0b1000_0000;
        }
        if self.rsv1 {
            byte1 |= 0b0100_0000;
        }
        if self.rsv2 {
            byte1 |= 0b0010_0000;
        }
        if self.rsv3 {
            byte1 |= 0b0001_0000;
        }
        dst.put_u8(byte1);

        // Second byte: MASK, Payload length
        let payload_len = self.payload.len();
        let mask_bit = if mask.is_some() {
            0b1000_0000
        } else {
            0b0000_0000
        };

        if payload_len < 126 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(masking_key) => {
                dst.extend_from_slice(&masking_key);
                let start = dst.len();
                dst.extend_from_slice(&self.payload);
                apply_mask(&mut dst[start..], &masking_key);
            }
            None => dst.extend_from_slice(&self.payload),
        }
    }

    /// Declared payload length.
    pub fn payload_length(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Create a new frame with the given opcode.
    pub fn new(opcode: WebSocketOpcode, payload: impl Into<Bytes>, fin: bool) -> Self {
        WebSocketFrame {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    /// Create a new text frame.
    pub fn new_text(text: impl Into<String>, fin: bool) -> Self {
        Self::new(WebSocketOpcode::Text, text.into(), fin)
    }

    /// Create a new binary frame.
    pub fn new_binary(data: impl Into<Bytes>, fin: bool) -> Self {
        Self::new(WebSocketOpcode::Binary, data, fin)
    }

    /// Create a new continuation frame.
    pub fn new_continuation(data: impl Into<Bytes>, fin: bool) -> Self {
        Self::new(WebSocketOpcode::Continuation, data, fin)
    }

    /// Create a new close frame with optional status code and reason.
    ///
    /// The reason is truncated on a character boundary so the payload stays
    /// within the control frame limit.
    pub fn new_close(code: Option<u16>, reason: Option<&str>) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code);
            if let Some(reason) = reason {
                let limit = MAX_CONTROL_PAYLOAD as usize - 2;
                let mut end = reason.len().min(limit);
                while !reason.is_char_boundary(end) {
                    end -= 1;
                }
                payload.extend_from_slice(&reason.as_bytes()[..end]);
            }
        }
        Self::new(WebSocketOpcode::Close, payload.freeze(), true)
    }

    /// Create a new ping frame.
    pub fn new_ping(data: impl Into<Bytes>) -> Self {
        Self::new(WebSocketOpcode::Ping, data, true)
    }

    /// Create a new pong frame.
    pub fn new_pong(data: impl Into<Bytes>) -> Self {
        Self::new(WebSocketOpcode::Pong, data, true)
    }

    /// Parse close frame payload to extract status code and reason.
    ///
    /// The reason is decoded leniently: the peer is already going away, so
    /// invalid UTF-8 is replaced rather than rejected.
    pub fn parse_close_payload(&self) -> Option<(u16, String)> {
        if self.opcode != WebSocketOpcode::Close {
            return None;
        }
        if self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }

    /// Check if this is a text frame.
    pub fn is_text(&self) -> bool {
        self.opcode == WebSocketOpcode::Text
    }

    /// Check if this is a binary frame.
    pub fn is_binary(&self) -> bool {
        self.opcode == WebSocketOpcode::Binary
    }

    /// Check if this is a close frame.
    pub fn is_close(&self) -> bool {
        self.opcode == WebSocketOpcode::Close
    }
}

/// Apply XOR mask to payload data per RFC 6455 Section 5.3.
///
/// This operation is reversible (applying the same mask twice yields the original data).
pub(crate) fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Outcome of feeding bytes to a [`FrameDecoder`].
#[derive(Debug)]
pub enum Decode {
    /// Supply exactly this many more bytes before feeding again.
    NeedBytes(usize),
    /// A complete frame. The decoder is exhausted.
    Ready(WebSocketFrame),
    /// The bytes violate the protocol. The decoder is exhausted.
    Failed(WebSocketError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    ExtendedLength,
    MaskingKey,
    Payload,
    Done,
}

/// Resumable decoder for a single frame.
///
/// Every field of the frame is requested with its exact size: 2 header
/// bytes, then 0, 2 or 8 bytes of extended length, 4 bytes of masking key
/// when the mask bit is set, and finally the payload. A chunk shorter than
/// requested is kept and the remainder is requested again.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    max_payload_size: u64,
    field: BytesMut,
    field_len: usize,
    fin: bool,
    opcode: WebSocketOpcode,
    masked: bool,
    mask_key: Option<[u8; 4]>,
    payload_length: u64,
}

impl FrameDecoder {
    /// Create a decoder accepting payloads up to `max_payload_size` bytes.
    pub fn new(max_payload_size: u64) -> Self {
        FrameDecoder {
            state: DecodeState::Header,
            max_payload_size,
            field: BytesMut::with_capacity(DEFAULT_READ_SIZE),
            field_len: DEFAULT_READ_SIZE,
            fin: false,
            opcode: WebSocketOpcode::Continuation,
            masked: false,
            mask_key: None,
            payload_length: 0,
        }
    }

    /// Number of bytes the decoder wants next. Zero once exhausted.
    pub fn remaining(&self) -> usize {
        if self.state == DecodeState::Done {
            return 0;
        }
        self.field_len - self.field.len()
    }

    /// Whether the decoder produced a frame or failed.
    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// Feed a chunk of at most [`remaining`](Self::remaining) bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Decode {
        if self.state == DecodeState::Done {
            return Decode::Failed(WebSocketError::InvalidBytes);
        }
        if chunk.is_empty() {
            self.state = DecodeState::Done;
            return Decode::Failed(WebSocketError::StreamClosed);
        }
        if chunk.len() > self.remaining() {
            self.state = DecodeState::Done;
            return Decode::Failed(WebSocketError::InvalidBytes);
        }

        self.field.extend_from_slice(chunk);
        if self.field.len() < self.field_len {
            return Decode::NeedBytes(self.remaining());
        }

        match self.advance() {
            Ok(decode) => decode,
            Err(err) => {
                self.state = DecodeState::Done;
                Decode::Failed(err)
            }
        }
    }

    /// Feed from a buffer, consuming only the bytes this frame needs.
    ///
    /// Bytes belonging to the next frame stay in `src`.
    pub fn decode_buf(&mut self, src: &mut BytesMut) -> Decode {
        loop {
            if self.state == DecodeState::Done {
                return Decode::Failed(WebSocketError::InvalidBytes);
            }
            let want = self.remaining();
            if src.is_empty() {
                return Decode::NeedBytes(want);
            }
            let chunk = src.split_to(want.min(src.len()));
            match self.feed(&chunk) {
                Decode::NeedBytes(_) => continue,
                other => return other,
            }
        }
    }

    fn expect(&mut self, state: DecodeState, len: usize) {
        self.state = state;
        self.field.clear();
        self.field_len = len;
    }

    /// Process every field that is complete. Zero-length fields (an empty
    /// payload) are finished without asking for more bytes.
    fn advance(&mut self) -> Result<Decode, WebSocketError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let byte1 = self.field[0];
                    let byte2 = self.field[1];

                    self.fin = (byte1 & 0b1000_0000) != 0;
                    if byte1 & 0b0111_0000 != 0 {
                        return Err(WebSocketError::ProtocolError(
                            "reserved bits set without extension".into(),
                        ));
                    }
                    self.opcode = WebSocketOpcode::from_u8(byte1 & 0b0000_1111)?;
                    if self.opcode.is_control() && !self.fin {
                        return Err(WebSocketError::ProtocolError(
                            "control frame is fragmented".into(),
                        ));
                    }

                    self.masked = (byte2 & 0b1000_0000) != 0;
                    match byte2 & 0b0111_1111 {
                        126 => self.expect(DecodeState::ExtendedLength, 2),
                        127 => self.expect(DecodeState::ExtendedLength, 8),
                        len => {
                            self.payload_length = len as u64;
                            self.after_length()?;
                        }
                    }
                }
                DecodeState::ExtendedLength => {
                    self.payload_length = if self.field_len == 2 {
                        u16::from_be_bytes([self.field[0], self.field[1]]) as u64
                    } else {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&self.field[..8]);
                        let len = u64::from_be_bytes(raw);
                        if len & (1 << 63) != 0 {
                            return Err(WebSocketError::FrameTooLarge(len));
                        }
                        len
                    };
                    self.after_length()?;
                }
                DecodeState::MaskingKey => {
                    let mut key = [0u8; 4];
                    key.copy_from_slice(&self.field[..4]);
                    self.mask_key = Some(key);
                    self.begin_payload()?;
                }
                DecodeState::Payload => {
                    let mut payload = self.field.split();
                    if let Some(key) = self.mask_key {
                        apply_mask(&mut payload, &key);
                    }
                    self.state = DecodeState::Done;
                    return Ok(Decode::Ready(WebSocketFrame {
                        fin: self.fin,
                        rsv1: false,
                        rsv2: false,
                        rsv3: false,
                        opcode: self.opcode,
                        masked: self.masked,
                        mask_key: self.mask_key,
                        payload: payload.freeze(),
                    }));
                }
                DecodeState::Done => return Err(WebSocketError::InvalidBytes),
            }

            if self.field_len > 0 {
                return Ok(Decode::NeedBytes(self.field_len));
            }
        }
    }

    fn after_length(&mut self) -> Result<(), WebSocketError> {
        if self.opcode.is_control() && self.payload_length > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ProtocolError(format!(
                "control frame payload of {} bytes exceeds {}",
                self.payload_length, MAX_CONTROL_PAYLOAD
            )));
        }
        if self.payload_length > self.max_payload_size {
            return Err(WebSocketError::FrameTooLarge(self.payload_length));
        }
        if self.masked {
            self.expect(DecodeState::MaskingKey, 4);
            Ok(())
        } else {
            self.begin_payload()
        }
    }

    fn begin_payload(&mut self) -> Result<(), WebSocketError> {
        let len = usize::try_from(self.payload_length)
            .map_err(|_| WebSocketError::FrameTooLarge(self.payload_length))?;
        // The buffer grows as payload chunks arrive.
        self.expect(DecodeState::Payload, len);
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(data: &[u8]) -> Decode {
        let mut decoder = FrameDecoder::default();
        let mut buffer = BytesMut::from(data);
        decoder.decode_buf(&mut buffer)
    }

    fn expect_frame(decode: Decode) -> WebSocketFrame {
        match decode {
            Decode::Ready(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    fn expect_error(decode: Decode) -> WebSocketError {
        match decode {
            Decode::Failed(err) => err,
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_text_frame() {
        // Simple unmasked text frame: "Hello"
        let data = vec![
            0b1000_0001, // FIN=1, RSV=0, Opcode=Text
            5,           // Payload length=5
            b'H',
            b'e',
            b'l',
            b'l',
            b'o',
        ];

        let mut decoder = FrameDecoder::default();
        assert!(matches!(decoder.feed(&data[..2]), Decode::NeedBytes(5)));

        let frame = expect_frame(decoder.feed(&data[2..]));
        assert!(frame.fin);
        assert_eq!(frame.opcode, WebSocketOpcode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_parse_masked_frame() {
        // Masked text frame
        let mask = [0x12, 0x34, 0x56, 0x78];
        let encoded = WebSocketFrame::new_text("Hello", true).encode(Some(mask));
        assert_eq!(encoded[1], 0b1000_0101);

        let mut decoder = FrameDecoder::default();
        assert!(matches!(decoder.feed(&encoded[..2]), Decode::NeedBytes(4)));
        assert!(matches!(decoder.feed(&encoded[2..6]), Decode::NeedBytes(5)));

        let frame = expect_frame(decoder.feed(&encoded[6..]));
        assert!(frame.masked);
        assert_eq!(frame.mask_key, Some(mask));
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_encode_frame() {
        let frame = WebSocketFrame::new_text("Hello", true);
        let encoded = frame.encode(None);

        let expected = vec![
            0b1000_0001, // FIN=1, Opcode=Text
            5,           // Payload length=5
            b'H',
            b'e',
            b'l',
            b'l',
            b'o',
        ];
        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_encode_continuation_without_fin() {
        let encoded = WebSocketFrame::new_continuation(&b"lo"[..], false).encode(None);
        assert_eq!(&encoded[..], &[0x00, 0x02, b'l', b'o']);
    }

    #[test]
    fn test_extended_length_16bit() {
        let payload = vec![0u8; 200];
        let mut data = vec![
            0b1000_0010, // FIN=1, Opcode=Binary
            126,         // Extended 16-bit length indicator
            0x00,
            0xC8, // Length = 200
        ];
        data.extend_from_slice(&payload);

        let mut decoder = FrameDecoder::default();
        assert!(matches!(decoder.feed(&data[..2]), Decode::NeedBytes(2)));
        assert!(matches!(decoder.feed(&data[2..4]), Decode::NeedBytes(200)));
        let frame = expect_frame(decoder.feed(&data[4..]));
        assert_eq!(frame.payload.len(), 200);
    }

    #[test]
    fn test_extended_length_64bit() {
        let payload = vec![7u8; 70_000];
        let encoded = WebSocketFrame::new_binary(payload.clone(), true).encode(None);
        assert_eq!(encoded[1], 127);
        assert_eq!(encoded.len(), 10 + 70_000);

        let frame = expect_frame(decode_all(&encoded));
        assert_eq!(frame.payload_length(), 70_000);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn test_byte_by_byte_matches_one_shot() {
        let mask = [0xA1, 0xB2, 0xC3, 0xD4];
        let encoded = WebSocketFrame::new_binary(vec![42u8; 300], false).encode(Some(mask));

        let one_shot = expect_frame(decode_all(&encoded));

        let mut decoder = FrameDecoder::default();
        let mut result = None;
        for (i, byte) in encoded.iter().enumerate() {
            match decoder.feed(std::slice::from_ref(byte)) {
                Decode::NeedBytes(n) => assert!(n > 0, "asked for zero bytes at {}", i),
                Decode::Ready(frame) => {
                    assert_eq!(i, encoded.len() - 1);
                    result = Some(frame);
                }
                Decode::Failed(err) => panic!("unexpected failure: {}", err),
            }
        }

        assert_eq!(result.unwrap(), one_shot);
    }

    #[test]
    fn test_decode_buf_leaves_next_frame() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&WebSocketFrame::new_text("one", true).encode(None));
        buffer.extend_from_slice(&WebSocketFrame::new_text("two", true).encode(None));

        let first = expect_frame(FrameDecoder::default().decode_buf(&mut buffer));
        assert_eq!(&first.payload[..], b"one");
        let second = expect_frame(FrameDecoder::default().decode_buf(&mut buffer));
        assert_eq!(&second.payload[..], b"two");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_payload_completes_with_header() {
        let mut decoder = FrameDecoder::default();
        let frame = expect_frame(decoder.feed(&[0x89, 0x00]));
        assert_eq!(frame.opcode, WebSocketOpcode::Ping);
        assert!(frame.payload.is_empty());

        // Masked with no payload: the key is the last thing requested.
        let mut decoder = FrameDecoder::default();
        assert!(matches!(decoder.feed(&[0x8A, 0x80]), Decode::NeedBytes(4)));
        let frame = expect_frame(decoder.feed(&[1, 2, 3, 4]));
        assert_eq!(frame.opcode, WebSocketOpcode::Pong);
    }

    #[test]
    fn test_close_frame() {
        let frame = WebSocketFrame::new_close(Some(1000), Some("Normal closure"));
        let encoded = frame.encode(None);

        let parsed = expect_frame(decode_all(&encoded));
        assert!(parsed.is_close());
        let (code, reason) = parsed.parse_close_payload().unwrap();
        assert_eq!(code, 1000);
        assert_eq!(reason, "Normal closure");
    }

    #[test]
    fn test_close_reason_is_truncated() {
        let reason = "é".repeat(100);
        let frame = WebSocketFrame::new_close(Some(1000), Some(&reason));
        assert!(frame.payload.len() <= 125);
        let (_, parsed) = frame.parse_close_payload().unwrap();
        assert!(reason.starts_with(&parsed));
    }

    #[test]
    fn test_control_frame_too_large() {
        // Control frame with payload > 125 bytes
        let data = vec![
            0b1000_1000, // FIN=1, Opcode=Close
            126,         // Extended length
            0x00,
            0x7F, // Length = 127 (> 125)
        ];

        let err = expect_error(decode_all(&data));
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
        assert_eq!(err.close_code(), close_code::PROTOCOL_ERROR);
    }

    #[test]
    fn test_fragmented_control_frame() {
        let err = expect_error(decode_all(&[0x09, 0x00]));
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let err = expect_error(decode_all(&[0b1100_0001, 0x00]));
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
    }

    #[test]
    fn test_reserved_opcodes() {
        let frame = expect_frame(decode_all(&[0x83, 0x01, 0xFF]));
        assert_eq!(frame.opcode, WebSocketOpcode::Reserved(0x3));

        let err = expect_error(decode_all(&[0x8B, 0x00]));
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
    }

    #[test]
    fn test_frame_too_large_before_payload() {
        let mut decoder = FrameDecoder::new(1024);
        assert!(matches!(decoder.feed(&[0x82, 127]), Decode::NeedBytes(8)));

        let err = expect_error(decoder.feed(&(1u64 << 32).to_be_bytes()));
        assert_eq!(err, WebSocketError::FrameTooLarge(1 << 32));
        assert_eq!(err.close_code(), close_code::FRAME_TOO_LARGE);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_length_top_bit_rejected() {
        let mut data = vec![0x82, 127];
        data.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let err = expect_error(decode_all(&data));
        assert!(matches!(err, WebSocketError::FrameTooLarge(_)));
    }

    #[test]
    fn test_empty_chunk_is_stream_closed() {
        let mut decoder = FrameDecoder::default();
        let err = expect_error(decoder.feed(&[]));
        assert_eq!(err, WebSocketError::StreamClosed);
    }

    #[test]
    fn test_oversupply_is_invalid_bytes() {
        let mut decoder = FrameDecoder::default();
        let err = expect_error(decoder.feed(&[0x81, 0x01, b'x']));
        assert_eq!(err, WebSocketError::InvalidBytes);
    }

    #[test]
    fn test_payload_buffer_grows_with_input() {
        let mut decoder = FrameDecoder::default();
        assert!(matches!(decoder.feed(&[0x82, 126]), Decode::NeedBytes(2)));
        assert!(matches!(decoder.feed(&[0xEA, 0x60]), Decode::NeedBytes(60000)));
        assert!(decoder.field.capacity() < 60000);

        assert!(matches!(decoder.feed(&[7u8; 100]), Decode::NeedBytes(59900)));
        assert!(decoder.field.capacity() < 60000);
        match decoder.feed(&[7u8; 59900]) {
            Decode::Ready(frame) => assert_eq!(frame.payload_length(), 60000),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_sendable_close_codes() {
        for code in [1000, 1001, 1002, 1003, 1007, 1011, 3000, 4999] {
            assert!(close_code::is_sendable(code), "{} should be sendable", code);
        }
        for code in [0, 999, 1004, 1005, 1006, 1015, 2000, 5000] {
            assert!(!close_code::is_sendable(code), "{} should not be sendable", code);
        }
    }

    #[test]
    fn test_incomplete_frame() {
        let mut decoder = FrameDecoder::default();
        let decode = decoder.feed(&[0b1000_0001]); // Only first byte
        assert!(matches!(decode, Decode::NeedBytes(1)));
    }
}
