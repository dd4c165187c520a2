//! Relay socket: one upgraded bidirectional connection
//!
//! A [`RelaySocket`] owns a single upgraded WebSocket through two pump
//! tasks: the inbound pump reads frames off the transport into a bounded
//! queue for [`RelaySocket::read`], and the outbound pump drains the queue
//! fed by [`RelaySocket::write`] into the transport. Both pumps share one
//! close signal; closing the socket is the single cancellation primitive
//! that unblocks every pending operation on it.
//!
//! Failure semantics: any transport-level error terminates both pumps via
//! the shared close path. No partial-message recovery is attempted; a
//! broken transport is fatal to the whole session.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use crate::error::{Error, Result};

/// Capacity of the inbound and outbound message queues.
pub const QUEUE_CAPACITY: usize = 64;

/// WebSocket close code for normal closure.
const CLOSE_NORMAL: u16 = 1000;

/// Framing kind of a relay message, mirroring the transport's frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Text frame; payload is sanitized to valid UTF-8 before the
    /// transport write
    Text,
    /// Binary frame; payload passes through untouched
    Binary,
}

/// One message flowing through a relay socket in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Transport framing for this payload
    pub kind: MessageKind,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl RelayMessage {
    /// Text message.
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: payload.into(),
        }
    }

    /// Binary message.
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: payload.into(),
        }
    }
}

/// Receiving half of a relay transport.
///
/// `None` covers both orderly peer close and fatal transport errors;
/// either one ends the inbound pump.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next inbound message, or `None` when the transport is done.
    async fn next_frame(&mut self) -> Option<RelayMessage>;
}

/// Sending half of a relay transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one message to the transport.
    async fn send_frame(&mut self, message: RelayMessage) -> Result<()>;

    /// Close the transport. Called exactly once, by the outbound pump.
    async fn close(&mut self);
}

/// Receiving half of an axum WebSocket.
pub struct WebSocketSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<RelayMessage> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(RelayMessage::text(text.as_bytes().to_vec()))
                }
                Some(Ok(Message::Binary(data))) => {
                    return Some(RelayMessage::binary(data.to_vec()))
                }
                // Protocol-level frames; the WebSocket layer answers pings
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            }
        }
    }
}

/// Sending half of an axum WebSocket.
pub struct WebSocketSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, message: RelayMessage) -> Result<()> {
        let frame = match message.kind {
            // The payload was sanitized by the outbound pump; lossy
            // conversion is a no-op here and satisfies the frame type.
            MessageKind::Text => {
                Message::Text(String::from_utf8_lossy(&message.payload).into_owned().into())
            }
            MessageKind::Binary => Message::Binary(message.payload.into()),
        };
        self.0
            .send(frame)
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self
            .0
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_NORMAL,
                reason: "".into(),
            })))
            .await;
    }
}

/// The bidirectional relay between one web client and the exec subsystem.
///
/// Created from an already-upgraded transport; destroyed (unregistered,
/// transport closed) when either pump observes a transport error, the
/// close signal fires, or the owning handler closes it explicitly.
pub struct RelaySocket {
    id: Uuid,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<RelayMessage>>,
    outbound_tx: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    closed: Mutex<bool>,
    registry: ConnectionRegistry,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl RelaySocket {
    /// Wraps an already-upgraded transport: allocates the bounded queues,
    /// registers the socket in `registry` under a fresh session id, and
    /// starts the inbound and outbound pumps.
    pub fn create(
        source: impl FrameSource,
        sink: impl FrameSink,
        registry: ConnectionRegistry,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);

        let socket = Arc::new(Self {
            id,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            cancel: CancellationToken::new(),
            closed: Mutex::new(false),
            registry: registry.clone(),
            pumps: Mutex::new(Vec::new()),
        });

        registry.register(id);
        info!(session_id = %id, live = registry.count(), "relay socket opened");

        let inbound = tokio::spawn(inbound_pump(Arc::clone(&socket), source, inbound_tx));
        let outbound = tokio::spawn(outbound_pump(Arc::clone(&socket), sink, outbound_rx));
        *socket.pumps.lock() = vec![inbound, outbound];

        socket
    }

    /// Splits an upgraded axum WebSocket into transport halves and wraps it.
    pub fn from_websocket(socket: WebSocket, registry: ConnectionRegistry) -> Arc<Self> {
        let (sink, source) = socket.split();
        Self::create(WebSocketSource(source), WebSocketSink(sink), registry)
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True once `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Enqueues a message destined for the client.
    ///
    /// Messages are delivered to the transport in enqueue order. Returns
    /// `Err(Closed)` instead of blocking when the socket is closing, even
    /// if the queue is full.
    pub async fn write(&self, message: RelayMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        tokio::select! {
            permit = self.outbound_tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(message);
                    Ok(())
                }
                Err(_) => Err(Error::Closed),
            },
            _ = self.cancel.cancelled() => Err(Error::Closed),
        }
    }

    /// Dequeues the next inbound message, in transport-arrival order, or
    /// wakes with `Err(Closed)` once the socket closes.
    pub async fn read(&self) -> Result<RelayMessage> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            message = rx.recv() => message.ok_or(Error::Closed),
            _ = self.cancel.cancelled() => Err(Error::Closed),
        }
    }

    /// Idempotent close, safe to call from any task any number of times.
    ///
    /// The first call unregisters the socket and broadcasts the close
    /// signal exactly once (guarded by the closed flag); the outbound
    /// pump, as sole owner of the sink, closes the transport in response.
    pub fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        let age = self.registry.session_age(&self.id);
        self.registry.unregister(&self.id);
        self.cancel.cancel();
        info!(
            session_id = %self.id,
            live = self.registry.count(),
            elapsed = ?age,
            "relay socket closed"
        );
    }

    /// Awaits both pumps. After this returns the transport is fully torn
    /// down; callers must join before treating the socket as destroyed.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pumps.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(session_id = %self.id, error = %e, "relay pump panicked");
            }
        }
    }
}

/// Inbound pump: transport → inbound queue. One per socket.
async fn inbound_pump(
    socket: Arc<RelaySocket>,
    mut source: impl FrameSource,
    queue: mpsc::Sender<RelayMessage>,
) {
    loop {
        tokio::select! {
            _ = socket.cancel.cancelled() => break,
            frame = source.next_frame() => match frame {
                Some(message) => {
                    tokio::select! {
                        sent = queue.send(message) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = socket.cancel.cancelled() => break,
                    }
                }
                None => {
                    debug!(session_id = %socket.id, "transport ended");
                    break;
                }
            },
        }
    }
    socket.close();
}

/// Outbound pump: outbound queue → transport. One per socket, and the
/// sole owner of the sink, so the transport close happens exactly once.
///
/// Every write accepted before the close signal fired is flushed: on
/// cancellation the queue is drained before the transport close frame is
/// sent, since `write()` enqueues before returning and refuses new
/// messages once the signal is up.
async fn outbound_pump(
    socket: Arc<RelaySocket>,
    mut sink: impl FrameSink,
    mut queue: mpsc::Receiver<RelayMessage>,
) {
    loop {
        tokio::select! {
            _ = socket.cancel.cancelled() => {
                while let Ok(message) = queue.try_recv() {
                    if deliver(&socket, &mut sink, message).await.is_err() {
                        break;
                    }
                }
                break;
            }
            message = queue.recv() => match message {
                Some(message) => {
                    if deliver(&socket, &mut sink, message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    sink.close().await;
    socket.close();
}

/// Sanitizes and writes one message to the transport.
async fn deliver(
    socket: &RelaySocket,
    sink: &mut impl FrameSink,
    mut message: RelayMessage,
) -> Result<()> {
    if message.kind == MessageKind::Text {
        message.payload = sanitize_text(message.payload);
    }
    if let Err(e) = sink.send_frame(message).await {
        warn!(session_id = %socket.id, error = %e, "transport write failed");
        return Err(e);
    }
    Ok(())
}

/// Strips invalid UTF-8 sequences from a payload destined for a text frame.
///
/// Valid input comes through unchanged; invalid byte sequences are dropped
/// rather than replaced, so the transport never carries invalid text.
pub fn sanitize_text(payload: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(payload) {
        Ok(valid) => valid.into_bytes(),
        Err(err) => {
            let bytes = err.into_bytes();
            let mut out = Vec::with_capacity(bytes.len());
            let mut rest = &bytes[..];
            while !rest.is_empty() {
                match std::str::from_utf8(rest) {
                    Ok(valid) => {
                        out.extend_from_slice(valid.as_bytes());
                        break;
                    }
                    Err(e) => {
                        let (valid, after) = rest.split_at(e.valid_up_to());
                        out.extend_from_slice(valid);
                        let skip = e.error_len().unwrap_or(after.len());
                        rest = &after[skip..];
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fake transport halves for exercising relay sockets without a network.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{FrameSink, FrameSource, RelayMessage};
    use crate::error::{Error, Result};

    /// Test-side handles: `client_tx` feeds inbound frames, `sent_rx`
    /// observes outbound frames, `close_count` counts transport closes.
    pub(crate) struct FakeTransport {
        pub(crate) client_tx: mpsc::UnboundedSender<RelayMessage>,
        pub(crate) sent_rx: mpsc::UnboundedReceiver<RelayMessage>,
        pub(crate) close_count: Arc<AtomicUsize>,
    }

    pub(crate) struct FakeSource(mpsc::UnboundedReceiver<RelayMessage>);

    pub(crate) struct FakeSink {
        sent: mpsc::UnboundedSender<RelayMessage>,
        close_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn next_frame(&mut self) -> Option<RelayMessage> {
            self.0.recv().await
        }
    }

    #[async_trait]
    impl FrameSink for FakeSink {
        async fn send_frame(&mut self, message: RelayMessage) -> Result<()> {
            self.sent.send(message).map_err(|_| Error::Closed)
        }

        async fn close(&mut self) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn fake_transport() -> (FakeSource, FakeSink, FakeTransport) {
        let (client_tx, source_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let close_count = Arc::new(AtomicUsize::new(0));
        (
            FakeSource(source_rx),
            FakeSink {
                sent: sent_tx,
                close_count: Arc::clone(&close_count),
            },
            FakeTransport {
                client_tx,
                sent_rx,
                close_count,
            },
        )
    }
}
