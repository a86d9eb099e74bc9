//! Session protocol engine.
//!
//! [`LiveClient`] owns the single transport connection, serializes outgoing
//! messages and classifies incoming frames into [`LiveEvent`]s.
//!
//! Each connection runs two tasks. The writer drains an ordered outbound
//! queue into the transport sink; `setup` is always the first item queued.
//! The reader decodes frames strictly in arrival order and emits events on
//! the channel returned by [`LiveClient::new`].

use crate::audio::decode_base64;
use crate::config::{ConnectionConfig, LiveConfig};
use crate::error::{RealtimeError, Result};
use crate::events::{LiveEvent, LogMessage, StreamingLog, trim_close_reason};
use crate::protocol::{
    Blob, ClientMessage, FunctionResponse, Part, ServerContent, ServerMessage, classify_media,
};
use crate::transport::{Frame, FrameSink, FrameStream, Transport, WebSocketTransport};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receiver for events emitted by a [`LiveClient`].
pub type EventReceiver = mpsc::UnboundedReceiver<LiveEvent>;

#[derive(Clone)]
struct Emitter {
    tx: mpsc::UnboundedSender<LiveEvent>,
}

impl Emitter {
    fn emit(&self, event: LiveEvent) {
        // Nobody listening is not an error for the engine.
        let _ = self.tx.send(event);
    }

    fn log(&self, kind: &str, message: impl Into<LogMessage>) {
        let entry = StreamingLog::new(kind, message);
        tracing::debug!(kind = %entry.kind, message = %entry.message, "live log");
        self.emit(LiveEvent::Log(entry));
    }
}

struct Connection {
    session_id: String,
    config: Arc<LiveConfig>,
    outbound: mpsc::UnboundedSender<Frame>,
    ready: bool,
    pending_calls: HashSet<String>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The writer stops on its own once `outbound` is dropped, after
        // flushing what is already queued.
        self.reader.abort();
    }
}

#[derive(Default)]
struct Shared {
    conn: Mutex<Option<Connection>>,
}

impl Shared {
    /// Take the connection out if it is still the one identified by `session_id`.
    fn release(&self, session_id: &str) -> Option<Connection> {
        let mut slot = self.conn.lock();
        if slot.as_ref().is_some_and(|c| c.session_id == session_id) { slot.take() } else { None }
    }

    fn with_current<R>(&self, session_id: &str, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        let mut slot = self.conn.lock();
        slot.as_mut().filter(|c| c.session_id == session_id).map(f)
    }
}

/// Live API protocol engine.
///
/// # Example
///
/// ```rust,ignore
/// use liveapi_realtime::{ConnectionConfig, LiveClient, LiveConfig, LiveEvent, Part};
///
/// let (client, mut events) = LiveClient::websocket(ConnectionConfig::new(api_key));
/// client.connect(LiveConfig::new("models/gemini-2.0-flash-exp")).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         LiveEvent::SetupComplete => client.send(vec![Part::text("hello")], true)?,
///         LiveEvent::Audio(pcm) => { /* play */ }
///         LiveEvent::Close { .. } => break,
///         _ => {}
///     }
/// }
/// ```
pub struct LiveClient {
    connection: ConnectionConfig,
    transport: Arc<dyn Transport>,
    emitter: Emitter,
    shared: Arc<Shared>,
    connect_gate: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

impl LiveClient {
    /// Create a client over the given transport.
    pub fn new(connection: ConnectionConfig, transport: Arc<dyn Transport>) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            connection,
            transport,
            emitter: Emitter { tx },
            shared: Arc::new(Shared::default()),
            connect_gate: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
        };
        (client, rx)
    }

    /// Create a client over a WebSocket transport.
    pub fn websocket(connection: ConnectionConfig) -> (Self, EventReceiver) {
        Self::new(connection, Arc::new(WebSocketTransport))
    }

    /// Open the transport and queue `setup`. Returns the new session id.
    ///
    /// Resolves once the transport is open; the setup acknowledgment arrives
    /// later as [`LiveEvent::SetupComplete`]. A concurrent call waits for the
    /// in-flight attempt and then fails with
    /// [`RealtimeError::AlreadyConnected`] if that attempt succeeded. A
    /// `disconnect` before the transport opens fails it with
    /// [`RealtimeError::Cancelled`].
    pub async fn connect(&self, config: LiveConfig) -> Result<String> {
        let _gate = self.connect_gate.lock().await;
        if self.is_connected() {
            return Err(RealtimeError::AlreadyConnected);
        }
        config.validate()?;

        let epoch = self.epoch.load(Ordering::SeqCst);
        let url = self.connection.websocket_url()?;
        tracing::info!(endpoint = %self.connection.endpoint(), model = %config.model, "Connecting live session");

        let (sink, stream) = match self.transport.open(&url).await {
            Ok(halves) => halves,
            Err(e) => {
                let message = format!("Could not connect to \"{}\"", self.connection.endpoint());
                self.emitter.log("server.error", message.clone());
                self.emitter.emit(LiveEvent::Error { message: format!("{message}: {e}") });
                return Err(e);
            }
        };

        let setup = ClientMessage::Setup(config.clone()).encode()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let config = Arc::new(config);
        let (outbound, queue) = mpsc::unbounded_channel();

        // Setup is the first frame of every connection.
        outbound.send(Frame::Text(setup)).map_err(|_| RealtimeError::NotConnected)?;

        {
            // `disconnect` bumps the epoch before taking this lock.
            let mut slot = self.shared.conn.lock();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                tracing::info!("Connect cancelled by disconnect");
                return Err(RealtimeError::Cancelled);
            }

            // Open precedes every event the reader can emit for this session.
            tracing::info!(session_id = %session_id, "Live session open");
            self.emitter.log("client.open", "Connected to socket");
            self.emitter.emit(LiveEvent::Open { session_id: session_id.clone() });

            tokio::spawn(write_loop(
                sink,
                queue,
                self.shared.clone(),
                session_id.clone(),
                self.emitter.clone(),
            ));
            let reader = tokio::spawn(read_loop(
                stream,
                self.shared.clone(),
                session_id.clone(),
                self.emitter.clone(),
            ));
            *slot = Some(Connection {
                session_id: session_id.clone(),
                config,
                outbound,
                ready: false,
                pending_calls: HashSet::new(),
                reader,
            });
        }

        self.emitter.log("client.send", "setup");
        Ok(session_id)
    }

    /// Close the connection. Returns whether a connection was torn down.
    ///
    /// Idempotent; also cancels a connect that has not opened yet.
    pub fn disconnect(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let Some(conn) = self.shared.conn.lock().take() else {
            return false;
        };
        let _ = conn.outbound.send(Frame::Close(None));
        let session_id = conn.session_id.clone();
        drop(conn);

        tracing::info!(session_id = %session_id, "Live session disconnected");
        self.emitter.log("client.close", "Disconnected");
        self.emitter.emit(LiveEvent::Close { session_id, reason: None });
        true
    }

    /// Send parts as one user turn.
    pub fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()> {
        self.send_message(ClientMessage::content(parts, turn_complete))
    }

    /// Send streamed media chunks.
    pub fn send_realtime_input(&self, chunks: Vec<Blob>) -> Result<()> {
        self.send_message(ClientMessage::realtime_input(chunks))
    }

    /// Answer tool calls received on this connection.
    pub fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send_message(ClientMessage::tool_response(responses))
    }

    /// Queue an application message for the writer.
    ///
    /// Fails with [`RealtimeError::NotConnected`] without a connection and
    /// [`RealtimeError::NotReady`] before setup completes.
    pub fn send_message(&self, message: ClientMessage) -> Result<()> {
        let frame = Frame::Text(message.encode()?);
        {
            let mut slot = self.shared.conn.lock();
            let conn = slot.as_mut().ok_or(RealtimeError::NotConnected)?;
            match &message {
                ClientMessage::Setup(_) => {
                    return Err(RealtimeError::protocol("setup is sent by connect"));
                }
                _ if !conn.ready => return Err(RealtimeError::NotReady),
                ClientMessage::ToolResponse(body) => {
                    if let Some(unknown) =
                        body.function_responses.iter().find(|r| !conn.pending_calls.contains(&r.id))
                    {
                        return Err(RealtimeError::UnknownToolCall(unknown.id.clone()));
                    }
                    for response in &body.function_responses {
                        conn.pending_calls.remove(&response.id);
                    }
                }
                _ => {}
            }
            conn.outbound.send(frame).map_err(|_| RealtimeError::NotConnected)?;
        }

        match &message {
            ClientMessage::RealtimeInput(input) => {
                self.emitter.log("client.realtimeInput", classify_media(&input.media_chunks));
            }
            ClientMessage::ToolResponse(_) => {
                self.emitter.log("client.toolResponse", serde_json::to_value(&message)?);
            }
            _ => self.emitter.log("client.send", serde_json::to_value(&message)?),
        }
        Ok(())
    }

    /// Whether a transport connection is live.
    pub fn is_connected(&self) -> bool {
        self.shared.conn.lock().is_some()
    }

    /// Whether setup has been acknowledged on the live connection.
    pub fn is_ready(&self) -> bool {
        self.shared.conn.lock().as_ref().is_some_and(|c| c.ready)
    }

    /// Id of the live connection.
    pub fn session_id(&self) -> Option<String> {
        self.shared.conn.lock().as_ref().map(|c| c.session_id.clone())
    }

    /// Configuration of the live connection.
    pub fn config(&self) -> Option<Arc<LiveConfig>> {
        self.shared.conn.lock().as_ref().map(|c| c.config.clone())
    }

    /// Endpoint this client connects to (without credentials).
    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.shared.conn.lock().take();
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("endpoint", &self.connection.endpoint())
            .field("session_id", &self.session_id())
            .field("ready", &self.is_ready())
            .finish()
    }
}

async fn write_loop(
    mut sink: FrameSink,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
    session_id: String,
    emitter: Emitter,
) {
    while let Some(frame) = queue.recv().await {
        let closing = matches!(frame, Frame::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::warn!(session_id = %session_id, error = %e, "Live send failed");
            if shared.release(&session_id).is_some() {
                let message = e.to_string();
                emitter.log("client.error", message.clone());
                emitter.emit(LiveEvent::Error { message: message.clone() });
                emitter.emit(LiveEvent::Close { session_id, reason: Some(message) });
            }
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: FrameStream, shared: Arc<Shared>, session_id: String, emitter: Emitter) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Frame::Text(text))) => {
                dispatch(ServerMessage::decode(&text), &shared, &session_id, &emitter);
            }
            Some(Ok(Frame::Binary(bytes))) => {
                dispatch(ServerMessage::decode_bytes(&bytes), &shared, &session_id, &emitter);
            }
            Some(Ok(Frame::Close(reason))) => break reason.map(|r| trim_close_reason(&r)),
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Live receive failed");
                if let Some(conn) = shared.release(&session_id) {
                    let message = e.to_string();
                    emitter.log("server.error", message.clone());
                    emitter.emit(LiveEvent::Error { message: message.clone() });
                    emitter.emit(LiveEvent::Close { session_id, reason: Some(message) });
                    // Dropping the connection aborts this task; nothing may follow.
                    drop(conn);
                }
                return;
            }
            None => break None,
        }
    };

    if let Some(conn) = shared.release(&session_id) {
        tracing::info!(session_id = %session_id, reason = ?reason, "Live session closed by server");
        let suffix = reason.as_deref().map(|r| format!(" with reason: {r}")).unwrap_or_default();
        emitter.log("server.close", format!("Disconnected{suffix}"));
        emitter.emit(LiveEvent::Close { session_id, reason });
        drop(conn);
    }
}

fn dispatch(decoded: Result<ServerMessage>, shared: &Shared, session_id: &str, emitter: &Emitter) {
    let message = match decoded {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Dropping unmatched frame");
            emitter.log("server.unmatched", e.to_string());
            return;
        }
    };

    match message {
        ServerMessage::ToolCall(tool_call) => {
            shared.with_current(session_id, |conn| {
                conn.pending_calls.extend(tool_call.function_calls.iter().map(|c| c.id.clone()));
            });
            let names: Vec<&str> = tool_call.function_calls.iter().map(|c| c.name.as_str()).collect();
            tracing::info!(session_id = %session_id, calls = ?names, "Tool call received");
            emitter.log("server.toolCall", serde_json::to_value(&tool_call).unwrap_or_default());
            emitter.emit(LiveEvent::ToolCall(tool_call.function_calls));
        }
        ServerMessage::SetupComplete => {
            let first = shared
                .with_current(session_id, |conn| !std::mem::replace(&mut conn.ready, true))
                .unwrap_or(false);
            if first {
                tracing::info!(session_id = %session_id, "Setup complete");
                emitter.log("server.setupComplete", "setupComplete");
                emitter.emit(LiveEvent::SetupComplete);
            } else {
                emitter.log("server.unmatched", "duplicate setupComplete");
            }
        }
        ServerMessage::ServerContent(content) => dispatch_content(content, emitter),
        ServerMessage::ToolCallCancellation(cancellation) => {
            shared.with_current(session_id, |conn| {
                for id in &cancellation.ids {
                    conn.pending_calls.remove(id);
                }
            });
            emitter.log("server.toolCallCancellation", serde_json::to_value(&cancellation).unwrap_or_default());
            emitter.emit(LiveEvent::ToolCallCancellation(cancellation.ids));
        }
    }
}

fn dispatch_content(content: ServerContent, emitter: &Emitter) {
    if content.is_interrupted() {
        emitter.log("receive.serverContent", "interrupted");
        emitter.emit(LiveEvent::Interrupted);
        return;
    }

    let turn_complete = content.is_turn_complete();

    if let Some(turn) = content.model_turn {
        let (audio, other): (Vec<Part>, Vec<Part>) = turn.parts.into_iter().partition(Part::is_audio);

        for part in audio {
            let Some(blob) = part.inline_data else { continue };
            match decode_base64(&blob.data) {
                Ok(pcm) => {
                    emitter.log("server.audio", format!("Buffer ({} bytes)", pcm.len()));
                    emitter.emit(LiveEvent::Audio(Bytes::from(pcm)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable audio part");
                    emitter.log("server.unmatched", format!("bad audio payload: {e}"));
                }
            }
        }

        if !other.is_empty() {
            emitter.log("server.content", serde_json::to_value(&other).unwrap_or_default());
            emitter.emit(LiveEvent::Content(other));
        }
    }

    if turn_complete {
        emitter.log("server.turnComplete", "turnComplete");
        emitter.emit(LiveEvent::TurnComplete);
    }
}
