//! LiveRunner: the session controller.
//!
//! Wires the capture pipeline to realtime input, model audio to the playback
//! pipeline, and tool calls to registered handlers, while tracking the
//! session lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Ready -> Closing -> Idle
//!   ^__________________ close / error ____________________|
//! ```
//!
//! Application sends issued while `Connecting` or `Connected` are queued and
//! flushed, in order, right after setup completes.

use crate::audio::{AudioFormat, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE};
use crate::capture::{AudioRecorder, CaptureEvent};
use crate::client::{EventReceiver, LiveClient};
use crate::config::{ConnectionConfig, DEFAULT_MODEL, FunctionDeclaration, LiveConfig};
use crate::device::{InputDevice, NullOutput, OutputDevice};
use crate::error::{RealtimeError, Result};
use crate::events::{LOG_RETENTION, LiveEvent, LogBuffer, StreamingLog};
use crate::playback::{AudioStreamer, PlaybackEvent};
use crate::protocol::{Blob, ClientMessage, FunctionCall, FunctionResponse, Part};
use crate::transport::{Transport, WebSocketTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Handler for function calls from the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a call and return its result.
    async fn execute(&self, call: &FunctionCall) -> Result<serde_json::Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<serde_json::Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<serde_json::Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<serde_json::Value> + Send + Sync,
{
    async fn execute(&self, call: &FunctionCall) -> Result<serde_json::Value> {
        (self.handler)(call)
    }
}

/// Session controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Idle,
    /// Transport opening.
    Connecting,
    /// Transport open, waiting for setup to complete.
    Connected,
    /// Setup complete; traffic flows.
    Ready,
    /// Tearing down.
    Closing,
}

/// Callbacks for session activity. Every method defaults to a no-op.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Transport opened.
    async fn on_open(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    /// Transport closed.
    async fn on_close(&self, _reason: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// A fatal error was reported.
    async fn on_error(&self, _message: &str) -> Result<()> {
        Ok(())
    }

    /// A log entry was recorded.
    async fn on_log(&self, _entry: &StreamingLog) -> Result<()> {
        Ok(())
    }

    /// Model audio arrived (PCM16 little-endian).
    async fn on_audio(&self, _pcm: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Non-audio model parts arrived.
    async fn on_content(&self, _parts: &[Part]) -> Result<()> {
        Ok(())
    }

    /// The model requested function calls.
    async fn on_tool_call(&self, _calls: &[FunctionCall]) -> Result<()> {
        Ok(())
    }

    /// The model withdrew function calls.
    async fn on_tool_call_cancellation(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    /// Setup completed.
    async fn on_setup_complete(&self) -> Result<()> {
        Ok(())
    }

    /// The model finished its turn.
    async fn on_turn_complete(&self) -> Result<()> {
        Ok(())
    }

    /// The model was interrupted.
    async fn on_interrupted(&self) -> Result<()> {
        Ok(())
    }

    /// Microphone level changed.
    async fn on_volume(&self, _volume: f32) -> Result<()> {
        Ok(())
    }

    /// Session state changed.
    async fn on_state_change(&self, _state: SessionState) -> Result<()> {
        Ok(())
    }

    /// Queued model audio finished playing.
    async fn on_playback_complete(&self) -> Result<()> {
        Ok(())
    }
}

/// Default no-op event handler.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventHandler;

#[async_trait]
impl EventHandler for NoOpEventHandler {}

/// Builder for [`LiveRunner`].
pub struct LiveRunnerBuilder {
    connection: Option<ConnectionConfig>,
    transport: Option<Arc<dyn Transport>>,
    config: Option<LiveConfig>,
    declarations: Vec<FunctionDeclaration>,
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    input: Option<Arc<dyn InputDevice>>,
    output: Option<Arc<dyn OutputDevice>>,
    log_retention: usize,
}

impl Default for LiveRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRunnerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            connection: None,
            transport: None,
            config: None,
            declarations: Vec::new(),
            tools: HashMap::new(),
            event_handler: None,
            input: None,
            output: None,
            log_retention: LOG_RETENTION,
        }
    }

    /// Set the connection target.
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set the transport (WebSocket by default).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: LiveConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Declare a function and register its handler.
    pub fn tool(mut self, declaration: FunctionDeclaration, handler: impl ToolHandler + 'static) -> Self {
        self.tools.insert(declaration.name.clone(), Arc::new(handler));
        self.declarations.push(declaration);
        self
    }

    /// Declare a function with a sync handler.
    pub fn tool_fn<F>(self, declaration: FunctionDeclaration, handler: F) -> Self
    where
        F: Fn(&FunctionCall) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.tool(declaration, FnToolHandler::new(handler))
    }

    /// Register a handler for a function already declared in the config.
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), handler);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.event_handler = Some(Arc::new(handler));
        self
    }

    /// Set the microphone. Without one, recording is unavailable.
    pub fn input_device(mut self, device: Arc<dyn InputDevice>) -> Self {
        self.input = Some(device);
        self
    }

    /// Set the speaker. Defaults to [`NullOutput`].
    pub fn output_device(mut self, device: Arc<dyn OutputDevice>) -> Self {
        self.output = Some(device);
        self
    }

    /// Number of log entries kept for [`LiveRunner::logs`].
    pub fn log_retention(mut self, entries: usize) -> Self {
        self.log_retention = entries;
        self
    }

    /// Build the runner (does not connect yet).
    pub fn build(self) -> Result<LiveRunner> {
        let connection = self.connection.ok_or_else(|| RealtimeError::config("Connection is required"))?;

        let mut config = self.config.unwrap_or_else(|| LiveConfig::new(DEFAULT_MODEL));
        let declared: Vec<String> = config.function_names().into_iter().map(str::to_string).collect();
        for declaration in self.declarations {
            if !declared.contains(&declaration.name) {
                config = config.with_function(declaration);
            }
        }
        config.validate()?;

        let transport = self.transport.unwrap_or_else(|| Arc::new(WebSocketTransport));
        let (client, events) = LiveClient::new(connection, transport);

        let (recorder, capture) = match self.input {
            Some(device) => {
                let (recorder, rx) = AudioRecorder::new(device, INPUT_SAMPLE_RATE);
                (Some(recorder), Some(rx))
            }
            None => (None, None),
        };
        let output = self.output.unwrap_or_else(|| Arc::new(NullOutput::default()));
        let (streamer, playback) = AudioStreamer::new(output, AudioFormat::live_output())?;

        let inner = Arc::new(RunnerInner {
            client,
            config,
            tools: self.tools,
            handler: self.event_handler.unwrap_or_else(|| Arc::new(NoOpEventHandler)),
            recorder,
            streamer,
            state: Mutex::new(SessionState::Idle),
            connect_gate: tokio::sync::Mutex::new(()),
            sessions: Mutex::new(Sessions::default()),
            pending: Mutex::new(VecDeque::new()),
            logs: Mutex::new(LogBuffer::new(self.log_retention)),
            last_error: Mutex::new(None),
            speaking: AtomicBool::new(false),
            volume: AtomicU32::new(0),
            pump_inputs: Mutex::new(Some(PumpInputs { events, capture, playback })),
        });
        Ok(LiveRunner { inner })
    }
}

struct PumpInputs {
    events: EventReceiver,
    capture: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
}

/// The connection being tracked, and the last close seen for any other.
#[derive(Default)]
struct Sessions {
    active: Option<String>,
    closed: Option<String>,
}

struct RunnerInner {
    client: LiveClient,
    config: LiveConfig,
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    handler: Arc<dyn EventHandler>,
    recorder: Option<AudioRecorder>,
    streamer: AudioStreamer,
    state: Mutex<SessionState>,
    connect_gate: tokio::sync::Mutex<()>,
    sessions: Mutex<Sessions>,
    pending: Mutex<VecDeque<ClientMessage>>,
    logs: Mutex<LogBuffer>,
    last_error: Mutex<Option<String>>,
    speaking: AtomicBool,
    volume: AtomicU32,
    pump_inputs: Mutex<Option<PumpInputs>>,
}

/// Session controller over a [`LiveClient`], an [`AudioRecorder`] and an
/// [`AudioStreamer`].
///
/// # Example
///
/// ```rust,ignore
/// use liveapi_realtime::{ConnectionConfig, FunctionDeclaration, LiveConfig, LiveRunner};
///
/// let runner = LiveRunner::builder()
///     .connection(ConnectionConfig::new(api_key))
///     .config(LiveConfig::new("models/gemini-2.0-flash-exp").with_voice("Aoede"))
///     .tool_fn(FunctionDeclaration::new("get_current_time"), |_call| {
///         Ok(serde_json::json!({ "time": "12:00" }))
///     })
///     .build()?;
///
/// runner.connect().await?;
/// runner.send_text("hello")?;
/// ```
pub struct LiveRunner {
    inner: Arc<RunnerInner>,
}

impl LiveRunner {
    /// Create a new builder.
    pub fn builder() -> LiveRunnerBuilder {
        LiveRunnerBuilder::new()
    }

    /// Connect and send setup. Resolves once the transport is open.
    ///
    /// A concurrent call waits for the attempt in flight, then fails with
    /// [`RealtimeError::AlreadyConnected`] unless that attempt failed.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.start_pump();

        let _gate = inner.connect_gate.lock().await;
        if !inner.transition_from(&[SessionState::Idle], SessionState::Connecting) {
            return Err(RealtimeError::AlreadyConnected);
        }
        inner.notify_state(SessionState::Connecting).await;

        match inner.client.connect(inner.config.clone()).await {
            Ok(session_id) => {
                if inner.adopt_session(session_id) {
                    inner.notify_state(SessionState::Connected).await;
                    return Ok(());
                }
                // Either a disconnect or the server ended it first. Nothing
                // may stay open untracked.
                let cancelled = inner.state() != SessionState::Connecting;
                inner.client.disconnect();
                inner.teardown().await;
                if cancelled {
                    Err(RealtimeError::Cancelled)
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                // After a disconnect the state has already moved on.
                if inner.transition_from(&[SessionState::Connecting], SessionState::Idle) {
                    inner.record_error(e.to_string());
                    inner.pending.lock().clear();
                    inner.notify_state(SessionState::Idle).await;
                }
                Err(e)
            }
        }
    }

    /// Disconnect and stop both pipelines. Safe from any state.
    pub async fn disconnect(&self) -> bool {
        let inner = &self.inner;
        if inner.transition_from(
            &[SessionState::Connecting, SessionState::Connected, SessionState::Ready],
            SessionState::Closing,
        ) {
            inner.notify_state(SessionState::Closing).await;
        }
        let closed = inner.client.disconnect();
        inner.teardown().await;
        closed
    }

    /// Send a text turn.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(vec![Part::text(text)], true)
    }

    /// Send parts as one user turn.
    pub fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()> {
        self.inner.submit(ClientMessage::content(parts, turn_complete))
    }

    /// Send media chunks.
    pub fn send_realtime_input(&self, chunks: Vec<Blob>) -> Result<()> {
        self.inner.submit(ClientMessage::realtime_input(chunks))
    }

    /// Answer tool calls by hand (registered tools answer automatically).
    pub fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.inner.submit(ClientMessage::tool_response(responses))
    }

    /// Start streaming the microphone. Requires a connection.
    pub async fn start_recording(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.client.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let recorder =
            inner.recorder.as_ref().ok_or_else(|| RealtimeError::device("No input device configured"))?;
        if let Err(e) = recorder.start().await {
            inner.report_device_error(&e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop the microphone. Returns whether a recording was stopped.
    pub async fn stop_recording(&self) -> bool {
        self.inner.stop_recording().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Whether a transport connection is live.
    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    /// Whether the microphone is streaming.
    pub fn is_recording(&self) -> bool {
        self.inner.recorder.as_ref().is_some_and(AudioRecorder::is_recording)
    }

    /// Whether model audio is playing.
    pub fn is_speaking(&self) -> bool {
        self.inner.speaking.load(Ordering::SeqCst)
    }

    /// Latest microphone level; 0 when not recording.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.inner.volume.load(Ordering::SeqCst))
    }

    /// Most recent error message.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// The most recent `n` log entries, oldest first.
    pub fn logs(&self, n: usize) -> Vec<StreamingLog> {
        self.inner.logs.lock().recent(n)
    }

    /// Drop all retained log entries.
    pub fn clear_logs(&self) {
        self.inner.logs.lock().clear();
    }

    /// Messages waiting for setup to complete.
    pub fn pending_sends(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Chunks queued for playback.
    pub fn queued_audio_chunks(&self) -> usize {
        self.inner.streamer.queued_chunks()
    }

    /// Id of the live connection.
    pub fn session_id(&self) -> Option<String> {
        self.inner.client.session_id()
    }

    /// Session configuration used on connect.
    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }
}

impl Drop for LiveRunner {
    fn drop(&mut self) {
        self.inner.client.disconnect();
        self.inner.streamer.close();
    }
}

impl RunnerInner {
    fn start_pump(self: &Arc<Self>) {
        if let Some(inputs) = self.pump_inputs.lock().take() {
            tokio::spawn(pump(Arc::downgrade(self), inputs));
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn transition_from(&self, from: &[SessionState], next: SessionState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&*state) && *state != next {
            *state = next;
            true
        } else {
            false
        }
    }

    async fn notify_state(&self, state: SessionState) {
        tracing::debug!(?state, "Session state changed");
        if let Err(e) = self.handler.on_state_change(state).await {
            tracing::warn!(error = %e, "Event handler failed");
        }
    }

    fn record_error(&self, message: String) {
        tracing::warn!(error = %message, "Live session error");
        *self.last_error.lock() = Some(message);
    }

    /// Device failures stay within their pipeline; the session carries on.
    async fn report_device_error(&self, error: &RealtimeError) {
        let message = error.to_string();
        self.record_error(message.clone());
        if let Err(e) = self.handler.on_error(&message).await {
            tracing::warn!(error = %e, "Event handler failed");
        }
    }

    fn submit(&self, message: ClientMessage) -> Result<()> {
        // The state lock orders sends against the setupComplete flush.
        let state = self.state.lock();
        match *state {
            SessionState::Idle | SessionState::Closing => Err(RealtimeError::NotConnected),
            SessionState::Connecting | SessionState::Connected => {
                tracing::debug!(kind = message.kind(), "Queueing until setup completes");
                self.pending.lock().push_back(message);
                Ok(())
            }
            SessionState::Ready => self.client.send_message(message),
        }
    }

    fn flush_pending(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Connecting | SessionState::Connected) {
            return false;
        }
        *state = SessionState::Ready;

        let queued: Vec<ClientMessage> = self.pending.lock().drain(..).collect();
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "Flushing queued sends");
        }
        for message in queued {
            if let Err(e) = self.client.send_message(message) {
                tracing::warn!(error = %e, "Dropping queued send");
            }
        }
        true
    }

    /// Track a connection that just opened. False when a disconnect or a
    /// server close already ended it.
    fn adopt_session(&self, session_id: String) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.closed.as_deref() == Some(session_id.as_str()) {
            return false;
        }
        if !self.transition_from(&[SessionState::Connecting], SessionState::Connected) {
            return false;
        }
        sessions.active = Some(session_id);
        true
    }

    /// Whether a close ends the tracked connection. Closes of untracked
    /// connections are remembered for [`Self::adopt_session`].
    fn release_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.active.as_deref() == Some(session_id) {
            sessions.active = None;
            true
        } else {
            sessions.closed = Some(session_id.to_string());
            false
        }
    }

    async fn stop_recording(&self) -> bool {
        let stopped = match &self.recorder {
            Some(recorder) => recorder.stop().await,
            None => false,
        };
        self.volume.store(0f32.to_bits(), Ordering::SeqCst);
        stopped
    }

    async fn teardown(&self) {
        self.sessions.lock().active.take();
        self.pending.lock().clear();
        self.stop_recording().await;
        self.streamer.stop();
        self.speaking.store(false, Ordering::SeqCst);

        let changed = {
            let mut state = self.state.lock();
            let changed = *state != SessionState::Idle;
            *state = SessionState::Idle;
            changed
        };
        if changed {
            self.notify_state(SessionState::Idle).await;
        }
    }

    fn dispatch_tool_calls(self: &Arc<Self>, calls: &[FunctionCall]) {
        for call in calls.iter().cloned() {
            let handler = self.tools.get(&call.name).cloned();
            let runner = Arc::downgrade(self);

            tokio::spawn(async move {
                let response = match handler {
                    Some(handler) => match handler.execute(&call).await {
                        Ok(value) => FunctionResponse::new(&call.id, value),
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                            FunctionResponse::error(&call.id, e.to_string())
                        }
                    },
                    None => {
                        tracing::warn!(tool = %call.name, "No handler for tool");
                        FunctionResponse::error(&call.id, format!("Unknown function: {}", call.name))
                    }
                };

                let Some(runner) = runner.upgrade() else { return };
                match runner.client.send_tool_response(vec![response]) {
                    Ok(()) => {}
                    Err(RealtimeError::UnknownToolCall(id)) => {
                        tracing::debug!(call_id = %id, "Dropping response to cancelled call");
                    }
                    Err(e) => tracing::warn!(tool = %call.name, error = %e, "Failed to send tool response"),
                }
            });
        }
    }

    async fn on_live_event(self: &Arc<Self>, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Open { session_id } => self.handler.on_open(&session_id).await?,
            LiveEvent::Close { session_id, reason } => {
                if self.release_session(&session_id) {
                    self.teardown().await;
                }
                self.handler.on_close(reason.as_deref()).await?;
            }
            LiveEvent::Error { message } => {
                self.record_error(message.clone());
                self.handler.on_error(&message).await?;
            }
            LiveEvent::Log(entry) => {
                self.logs.lock().push(entry.clone());
                self.handler.on_log(&entry).await?;
            }
            LiveEvent::SetupComplete => {
                if self.flush_pending() {
                    self.notify_state(SessionState::Ready).await;
                }
                self.handler.on_setup_complete().await?;
            }
            LiveEvent::Audio(pcm) => {
                self.speaking.store(true, Ordering::SeqCst);
                if let Err(e @ RealtimeError::DeviceError(_)) = self.streamer.add_pcm16(&pcm) {
                    self.report_device_error(&e).await;
                }
                self.handler.on_audio(&pcm).await?;
            }
            LiveEvent::Content(parts) => self.handler.on_content(&parts).await?,
            LiveEvent::ToolCall(calls) => {
                self.dispatch_tool_calls(&calls);
                self.handler.on_tool_call(&calls).await?;
            }
            LiveEvent::ToolCallCancellation(ids) => self.handler.on_tool_call_cancellation(&ids).await?,
            LiveEvent::TurnComplete => {
                self.streamer.complete();
                self.handler.on_turn_complete().await?;
            }
            LiveEvent::Interrupted => {
                self.streamer.stop();
                self.speaking.store(false, Ordering::SeqCst);
                self.handler.on_interrupted().await?;
            }
        }
        Ok(())
    }

    async fn on_capture_event(&self, event: CaptureEvent) -> Result<()> {
        let recording = self.recorder.as_ref().is_some_and(AudioRecorder::is_recording);
        match event {
            CaptureEvent::Data(data) if recording => {
                let chunk = Blob::new(INPUT_MIME_TYPE, data);
                if let Err(e) = self.submit(ClientMessage::realtime_input(vec![chunk])) {
                    tracing::debug!(error = %e, "Dropping microphone chunk");
                }
            }
            CaptureEvent::Volume(volume) if recording => {
                self.volume.store(volume.to_bits(), Ordering::SeqCst);
                self.handler.on_volume(volume).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_playback_event(&self, event: PlaybackEvent) -> Result<()> {
        match event {
            PlaybackEvent::Complete => {
                self.speaking.store(false, Ordering::SeqCst);
                self.handler.on_playback_complete().await
            }
        }
    }
}

async fn next_capture(capture: &mut Option<mpsc::UnboundedReceiver<CaptureEvent>>) -> Option<CaptureEvent> {
    match capture {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Routes engine, capture and playback events until the runner is dropped.
async fn pump(runner: Weak<RunnerInner>, inputs: PumpInputs) {
    let PumpInputs { mut events, mut capture, mut playback } = inputs;

    loop {
        let outcome = tokio::select! {
            event = events.recv() => {
                let (Some(event), Some(runner)) = (event, runner.upgrade()) else { break };
                runner.on_live_event(event).await
            }
            Some(event) = next_capture(&mut capture) => {
                let Some(runner) = runner.upgrade() else { break };
                runner.on_capture_event(event).await
            }
            Some(event) = playback.recv() => {
                let Some(runner) = runner.upgrade() else { break };
                runner.on_playback_event(event).await
            }
        };

        if let Err(e) = outcome {
            tracing::warn!(error = %e, "Event handler failed");
        }
    }
    tracing::debug!("Runner event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn runner() -> LiveRunner {
        let (transport, _server) = MemoryTransport::pair();
        LiveRunner::builder()
            .connection(ConnectionConfig::new("k").with_url("memory://live"))
            .transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[test]
    fn test_close_seen_before_adoption_is_not_tracked() {
        let runner = runner();
        let inner = &runner.inner;

        assert!(!inner.release_session("s1"));
        assert!(inner.transition_from(&[SessionState::Idle], SessionState::Connecting));
        assert!(!inner.adopt_session("s1".into()));
        assert_eq!(inner.state(), SessionState::Connecting);

        assert!(inner.adopt_session("s2".into()));
        assert_eq!(inner.state(), SessionState::Connected);
        assert!(!inner.release_session("s1"));
        assert!(inner.release_session("s2"));
    }

    #[test]
    fn test_adoption_after_disconnect_is_refused() {
        let runner = runner();
        let inner = &runner.inner;

        assert!(inner.transition_from(&[SessionState::Idle], SessionState::Connecting));
        assert!(inner.transition_from(&[SessionState::Connecting], SessionState::Closing));
        assert!(!inner.adopt_session("s1".into()));
        assert!(inner.sessions.lock().active.is_none());
    }
}
