//! Message-oriented duplex transports.
//!
//! The protocol engine only needs an ordered sink and an ordered stream of
//! frames. [`WebSocketTransport`] provides them over `tokio-tungstenite`;
//! [`MemoryTransport`] provides them in-process, paired with a
//! [`MemoryServer`] that plays the remote side.

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Once;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

/// A transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame with optional reason.
    Close(Option<String>),
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RealtimeError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Opens connections to a URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection; resolves once the transport reports open.
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)>;
}

static CRYPTO_PROVIDER: Once = Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Another component may already have installed one; either is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// WebSocket transport over `tokio-tungstenite` with rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        ensure_crypto_provider();

        let request = url.into_client_request().map_err(|e| {
            RealtimeError::connection(format!("Failed to create client request: {e}"))
        })?;
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::connection(format!("WebSocket connect error: {e}")))?;

        let (sink, source) = ws.split();

        let sink = sink
            .sink_map_err(|e| RealtimeError::connection(format!("Send error: {e}")))
            .with(|frame: Frame| futures::future::ready(Ok::<_, RealtimeError>(to_message(frame))));

        let source = source.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => {
                    Some(Ok(Frame::Close(frame.map(|f| f.reason.as_str().to_owned()).filter(|r| !r.is_empty()))))
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(RealtimeError::connection(format!("Receive error: {e}")))),
            }
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Close(_) => Message::Close(None),
    }
}

/// In-process transport. Every `open` hands the server side of the new
/// connection to the paired [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: std::sync::Arc<parking_lot::Mutex<Option<String>>>,
}

/// Remote side of a [`MemoryTransport`].
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    refuse: std::sync::Arc<parking_lot::Mutex<Option<String>>>,
}

impl MemoryTransport {
    /// Create a connected transport/server pair.
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded();
        let refuse = std::sync::Arc::new(parking_lot::Mutex::new(None));
        (Self { accept_tx, refuse: refuse.clone() }, MemoryServer { accept_rx, refuse })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        if let Some(reason) = self.refuse.lock().take() {
            return Err(RealtimeError::connection(format!("Could not connect: {reason}")));
        }

        let (to_server, from_client) = mpsc::unbounded::<Frame>();
        let (to_client, from_server) = mpsc::unbounded::<Result<Frame>>();

        self.accept_tx
            .unbounded_send(MemoryPeer { url: url.to_string(), inbound: from_client, outbound: to_client })
            .map_err(|_| RealtimeError::connection("memory server is gone"))?;

        let sink = to_server.sink_map_err(|_| RealtimeError::connection("memory peer closed"));
        Ok((Box::pin(sink), Box::pin(from_server)))
    }
}

impl MemoryServer {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.next().await
    }

    /// Make the next `open` fail with the given reason.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        *self.refuse.lock() = Some(reason.into());
    }
}

/// Server end of one in-memory connection.
pub struct MemoryPeer {
    url: String,
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Result<Frame>>,
}

impl MemoryPeer {
    /// URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame sent by the client; `None` once the client side is dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.next().await
    }

    /// Next text frame decoded as JSON, skipping close frames.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Binary(bytes) => return serde_json::from_slice(&bytes).ok(),
                Frame::Close(_) => continue,
            }
        }
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.inbound.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// Send a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound.unbounded_send(Ok(Frame::Text(text.into()))).is_ok()
    }

    /// Send a JSON value as a binary frame, the way the live service does.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.outbound.unbounded_send(Ok(Frame::Binary(value.to_string().into_bytes()))).is_ok()
    }

    /// Inject a transport failure.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.outbound.unbounded_send(Err(RealtimeError::connection(message.into()))).is_ok()
    }

    /// Close the connection with an optional reason.
    pub fn close(self, reason: Option<&str>) {
        let _ = self.outbound.unbounded_send(Ok(Frame::Close(reason.map(str::to_string))));
    }
}
