//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use liveapi_realtime::device::{InputCallback, OpenedOutput, RenderCallback};
use liveapi_realtime::transport::{FrameSink, FrameStream};
use liveapi_realtime::{
    ActiveStream, ConnectionConfig, EventHandler, InputDevice, LiveEvent, MemoryTransport, OutputDevice, Result,
    SessionState, StreamingLog, Transport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

static TRACING: std::sync::Once = std::sync::Once::new();

/// Route library logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn memory_connection() -> ConnectionConfig {
    init_tracing();
    ConnectionConfig::new("test-key").with_url("memory://live")
}

/// Next non-log event, or panic after [`WAIT`].
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if !matches!(event, LiveEvent::Log(_)) {
            return event;
        }
    }
}

/// Poll `condition` until it holds, or panic after [`WAIT`].
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type SharedCallback<T> = Arc<Mutex<Option<T>>>;

struct ManualStream<T: Send> {
    slot: SharedCallback<T>,
}

impl<T: Send> ActiveStream for ManualStream<T> {
    fn close(&mut self) {
        self.slot.lock().unwrap().take();
    }
}

/// Microphone driven by the test.
#[derive(Clone, Default)]
pub struct ManualInput {
    callback: SharedCallback<InputCallback>,
    opens: Arc<AtomicUsize>,
}

impl ManualInput {
    /// Deliver samples as if the device produced them.
    pub fn feed(&self, samples: &[f32]) -> bool {
        match self.callback.lock().unwrap().as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl InputDevice for ManualInput {
    fn open(&self, _sample_rate: u32, on_samples: InputCallback) -> Result<Box<dyn ActiveStream>> {
        *self.callback.lock().unwrap() = Some(on_samples);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualStream { slot: self.callback.clone() }))
    }
}

/// Speaker whose render clock is driven by the test.
#[derive(Clone)]
pub struct ManualOutput {
    sample_rate: u32,
    render: SharedCallback<RenderCallback>,
}

impl ManualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate, render: Arc::default() }
    }

    /// Pull `frames` samples from the pipeline.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![f32::NAN; frames];
        if let Some(render) = self.render.lock().unwrap().as_mut() {
            render(&mut out);
        }
        out
    }

    pub fn is_open(&self) -> bool {
        self.render.lock().unwrap().is_some()
    }
}

impl OutputDevice for ManualOutput {
    fn open(&self, render: RenderCallback) -> Result<OpenedOutput> {
        *self.render.lock().unwrap() = Some(render);
        Ok(OpenedOutput {
            stream: Box::new(ManualStream { slot: self.render.clone() }),
            sample_rate: self.sample_rate,
        })
    }
}

/// Records handler callbacks by name.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn seen(&self, name: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == name)
    }

    fn push(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_open(&self, _session_id: &str) -> Result<()> {
        self.push("open");
        Ok(())
    }

    async fn on_close(&self, reason: Option<&str>) -> Result<()> {
        self.push(format!("close:{}", reason.unwrap_or("")));
        Ok(())
    }

    async fn on_error(&self, message: &str) -> Result<()> {
        self.push(format!("error:{message}"));
        Ok(())
    }

    async fn on_setup_complete(&self) -> Result<()> {
        self.push("setupcomplete");
        Ok(())
    }

    async fn on_turn_complete(&self) -> Result<()> {
        self.push("turncomplete");
        Ok(())
    }

    async fn on_interrupted(&self) -> Result<()> {
        self.push("interrupted");
        Ok(())
    }

    async fn on_state_change(&self, state: SessionState) -> Result<()> {
        self.push(format!("state:{state:?}"));
        Ok(())
    }

    async fn on_playback_complete(&self) -> Result<()> {
        self.push("playbackcomplete");
        Ok(())
    }
}

/// Records callbacks like [`RecordingHandler`] but stalls on every log entry,
/// so the event pump falls behind the connection.
#[derive(Clone, Default)]
pub struct SlowLogHandler {
    pub inner: RecordingHandler,
}

#[async_trait]
impl EventHandler for SlowLogHandler {
    async fn on_log(&self, _entry: &StreamingLog) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(())
    }

    async fn on_close(&self, reason: Option<&str>) -> Result<()> {
        self.inner.on_close(reason).await
    }

    async fn on_state_change(&self, state: SessionState) -> Result<()> {
        self.inner.on_state_change(state).await
    }
}

/// In-memory transport that takes `delay` to open and counts attempts.
#[derive(Clone)]
pub struct SlowTransport {
    inner: Arc<MemoryTransport>,
    delay: Duration,
    opens: Arc<AtomicUsize>,
}

impl SlowTransport {
    pub fn new(inner: MemoryTransport, delay: Duration) -> Self {
        Self { inner: Arc::new(inner), delay, opens: Arc::default() }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.open(url).await
    }
}
