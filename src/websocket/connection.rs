//! Per-connection driver: read loop, closing handshake and outbound API.
//!
//! A [`WebSocketConnection`] takes an already-upgraded transport and runs a
//! dedicated task that reads exactly what the [`MessageStream`] asks for,
//! answers pings and closes, and dispatches everything else to the
//! application's [`WebSocketHandler`]. The clonable [`WebSocket`] handle is
//! how the application writes; all writes share one lock so frames from
//! different tasks never interleave.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::frame::{WebSocketError, WebSocketFrame, WebSocketOpcode, close_code};
use super::message::{ControlMessage, Message, MessageKind};
use super::stream::MessageStream;
use crate::handler::WebSocketHandler;
use crate::types::{CloseReason, WebSocketConfig};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lazily produced chunks of a fragmented message.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// What [`WebSocket::send`] transmits.
pub enum Payload {
    /// Text sent as one frame
    Text(String),
    /// Bytes sent as one binary frame
    Binary(Bytes),
    /// A pre-built message sent as one frame
    Message(Message),
    /// A pre-built control message
    Control(ControlMessage),
    /// One message fragmented into a frame per chunk
    Fragmented {
        /// Kind announced by the first fragment
        kind: MessageKind,
        /// Chunks in order
        chunks: ChunkStream,
    },
}

impl Payload {
    /// Fragmented message from a stream of chunks.
    pub fn fragmented<S>(chunks: S, binary: bool) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        let kind = if binary {
            MessageKind::Binary
        } else {
            MessageKind::Text
        };
        Payload::Fragmented {
            kind,
            chunks: Box::pin(chunks),
        }
    }

    /// Fragmented message from an iterator of chunks.
    pub fn from_chunks<I>(chunks: I, binary: bool) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::fragmented(futures_util::stream::iter(chunks), binary)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(data.into())
    }
}

impl From<Message> for Payload {
    fn from(message: Message) -> Self {
        Payload::Message(message)
    }
}

impl From<ControlMessage> for Payload {
    fn from(control: ControlMessage) -> Self {
        Payload::Control(control)
    }
}

struct Shared {
    writer: Mutex<BoxedWriter>,
    client_terminated: AtomicBool,
    server_terminated: AtomicBool,
    protocols: Vec<String>,
    extensions: Vec<String>,
}

/// Handle to a running connection.
///
/// Cheap to clone and usable from any task, including from inside handler
/// callbacks.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl WebSocket {
    /// Send a payload to the peer.
    ///
    /// Data payloads are refused with [`WebSocketError::StreamClosed`] once
    /// this side has sent its close frame. A close control message goes
    /// through [`close`](Self::close).
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), WebSocketError> {
        let payload = payload.into();

        if let Payload::Control(control) = payload {
            control.validate()?;
            return match control {
                ControlMessage::Close(reason) => self.close(reason.code, &reason.reason).await,
                control => self.write_frame(control.to_frame()).await,
            };
        }

        if self.server_terminated() {
            return Err(WebSocketError::StreamClosed);
        }

        match payload {
            Payload::Text(text) => self.write_frame(WebSocketFrame::new_text(text, true)).await,
            Payload::Binary(data) => {
                self.write_frame(WebSocketFrame::new_binary(data, true))
                    .await
            }
            Payload::Message(message) => self.write_bytes(&message.single()).await,
            Payload::Fragmented { kind, chunks } => self.send_fragmented(kind, chunks).await,
            Payload::Control(_) => Ok(()),
        }
    }

    /// Write every chunk as its own frame, holding the write lock for the
    /// whole message so no other data frame lands in between.
    async fn send_fragmented(
        &self,
        kind: MessageKind,
        mut chunks: ChunkStream,
    ) -> Result<(), WebSocketError> {
        let mut writer = self.shared.writer.lock().await;

        let Some(mut current) = chunks.next().await else {
            let frame = WebSocketFrame::new(kind.opcode(), Bytes::new(), true);
            return write_all(&mut writer, &frame.encode(None)).await;
        };

        let mut opcode = kind.opcode();
        while let Some(next) = chunks.next().await {
            let frame = WebSocketFrame::new(opcode, current, false);
            write_all(&mut writer, &frame.encode(None)).await?;
            current = next;
            opcode = WebSocketOpcode::Continuation;
        }

        let frame = WebSocketFrame::new(opcode, current, true);
        write_all(&mut writer, &frame.encode(None)).await
    }

    /// Start the closing handshake.
    ///
    /// Only the first call transmits a close frame; later calls do nothing.
    /// The connection is terminated once the peer's close frame arrives (or
    /// the read times out).
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        if self.shared.server_terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Sending WebSocket close frame with code {}", code);
        self.write_frame(WebSocketFrame::new_close(Some(code), Some(reason)))
            .await
    }

    /// Send a ping. The payload must fit in a control frame.
    pub async fn ping(&self, data: impl Into<Bytes>) -> Result<(), WebSocketError> {
        let ping = ControlMessage::Ping(data.into());
        ping.validate()?;
        self.write_frame(ping.to_frame()).await
    }

    /// Whether both sides have finished the closing handshake.
    pub fn terminated(&self) -> bool {
        self.client_terminated() && self.server_terminated()
    }

    /// Whether the peer's side is finished.
    pub fn client_terminated(&self) -> bool {
        self.shared.client_terminated.load(Ordering::SeqCst)
    }

    /// Whether this side sent its close frame.
    pub fn server_terminated(&self) -> bool {
        self.shared.server_terminated.load(Ordering::SeqCst)
    }

    /// Subprotocols negotiated during the upgrade.
    pub fn protocols(&self) -> &[String] {
        &self.shared.protocols
    }

    /// Extensions negotiated during the upgrade.
    pub fn extensions(&self) -> &[String] {
        &self.shared.extensions
    }

    pub(crate) async fn write_frame(&self, frame: WebSocketFrame) -> Result<(), WebSocketError> {
        self.write_bytes(&frame.encode(None)).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), WebSocketError> {
        let mut writer = self.shared.writer.lock().await;
        write_all(&mut writer, bytes).await
    }

    fn terminate(&self) {
        self.shared.client_terminated.store(true, Ordering::SeqCst);
        self.shared.server_terminated.store(true, Ordering::SeqCst);
    }

    /// Shut the transport down. Failures are irrelevant at this point.
    async fn shutdown(&self) {
        let mut writer = self.shared.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            tracing::debug!("WebSocket transport shutdown failed: {}", err);
        }
    }
}

async fn write_all(writer: &mut BoxedWriter, bytes: &[u8]) -> Result<(), WebSocketError> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// An upgraded connection waiting to be started.
pub struct WebSocketConnection<H> {
    reader: BoxedReader,
    writer: BoxedWriter,
    handler: Arc<H>,
    protocols: Vec<String>,
    extensions: Vec<String>,
    config: WebSocketConfig,
}

impl<H: WebSocketHandler> WebSocketConnection<H> {
    /// Wrap an upgraded transport.
    pub fn new<T>(transport: T, handler: H) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        WebSocketConnection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handler: Arc::new(handler),
            protocols: Vec::new(),
            extensions: Vec::new(),
            config: WebSocketConfig::default(),
        }
    }

    /// Record the negotiated subprotocols.
    pub fn protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Record the negotiated extensions.
    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Use a custom configuration.
    pub fn config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the connection on its own task.
    pub fn spawn(self) -> (WebSocket, JoinHandle<()>) {
        let (ws, driver) = self.into_driver();
        let task = tokio::spawn(driver.run(ws.clone()));
        (ws, task)
    }

    /// Run the connection on the current task until it is closed.
    pub async fn run(self) {
        let (ws, driver) = self.into_driver();
        driver.run(ws).await
    }

    fn into_driver(self) -> (WebSocket, Driver<H>) {
        let ws = WebSocket {
            shared: Arc::new(Shared {
                writer: Mutex::new(self.writer),
                client_terminated: AtomicBool::new(false),
                server_terminated: AtomicBool::new(false),
                protocols: self.protocols,
                extensions: self.extensions,
            }),
        };
        let driver = Driver {
            reader: self.reader,
            handler: self.handler,
            config: self.config,
        };
        (ws, driver)
    }
}

struct Driver<H> {
    reader: BoxedReader,
    handler: Arc<H>,
    config: WebSocketConfig,
}

impl<H: WebSocketHandler> Driver<H> {
    async fn run(self, ws: WebSocket) {
        let Driver {
            reader,
            handler,
            config,
        } = self;

        // A panic in a callback ends up here as a JoinError instead of
        // escaping the connection.
        let session = tokio::spawn(session(reader, ws.clone(), handler.clone(), config));
        let observed = match session.await {
            Ok(observed) => observed,
            Err(err) => {
                tracing::error!("WebSocket session failed: {}", err);
                None
            }
        };

        ws.terminate();
        let close = observed.unwrap_or_else(CloseReason::abnormal);
        handler.closed(&ws, close.code, close.reason).await;
        ws.shutdown().await;
        tracing::debug!("WebSocket connection closed");
    }
}

async fn session<H: WebSocketHandler>(
    reader: BoxedReader,
    ws: WebSocket,
    handler: Arc<H>,
    config: WebSocketConfig,
) -> Option<CloseReason> {
    handler.opened(&ws).await;
    read_loop(reader, ws, handler, config).await
}

/// Returns the peer's close frame if one was observed.
async fn read_loop<H: WebSocketHandler>(
    mut reader: BoxedReader,
    ws: WebSocket,
    handler: Arc<H>,
    config: WebSocketConfig,
) -> Option<CloseReason> {
    let mut stream = MessageStream::new(config.max_payload_size);
    let mut buffer = vec![0u8; config.read_chunk_size.max(1)];

    tracing::debug!("WebSocket read loop started");
    while !ws.terminated() {
        let want = stream.next_read_size().min(buffer.len());
        let read = tokio::time::timeout(config.read_timeout, reader.read(&mut buffer[..want]));
        let n = match read.await {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                tracing::debug!("WebSocket read failed: {}", err);
                break;
            }
            Err(_) => {
                tracing::debug!("WebSocket read timed out after {:?}", config.read_timeout);
                break;
            }
        };

        if stream.feed(&buffer[..n]).is_err() {
            tracing::debug!("WebSocket transport closed by peer");
            break;
        }

        if let Some(closing) = stream.closing().cloned() {
            if !ws.server_terminated() {
                // Codes that may not appear on the wire are answered as a
                // protocol error.
                let code = if close_code::is_sendable(closing.code) {
                    closing.code
                } else {
                    close_code::PROTOCOL_ERROR
                };
                if let Err(err) = ws.close(code, &closing.reason).await {
                    tracing::debug!("Could not answer close frame: {}", err);
                }
            }
            ws.shared.client_terminated.store(true, Ordering::SeqCst);
            return Some(closing);
        }

        if stream.has_errors() {
            let errors: Vec<WebSocketError> = stream.drain_errors().collect();
            for err in errors {
                let reason = CloseReason::from(&err);
                if let Err(err) = ws.close(reason.code, &reason.reason).await {
                    tracing::debug!("Could not send close frame: {}", err);
                }
            }
            break;
        }

        if let Some(message) = stream.take_message() {
            handler.received_message(&ws, message).await;
        }

        let pings: Vec<Bytes> = stream.drain_pings().collect();
        for ping in pings {
            if let Err(err) = ws.write_frame(WebSocketFrame::new_pong(ping)).await {
                tracing::debug!("Could not answer ping: {}", err);
            }
        }

        let pongs: Vec<Bytes> = stream.drain_pongs().collect();
        for pong in pongs {
            handler.ponged(&ws, pong).await;
        }
    }

    None
}
