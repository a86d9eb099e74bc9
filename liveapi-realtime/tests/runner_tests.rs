//! Session controller tests over the in-memory transport and manual devices.

mod common;

use common::{
    ManualInput, ManualOutput, RecordingHandler, SlowLogHandler, SlowTransport, memory_connection, wait_until,
};
use liveapi_realtime::transport::MemoryPeer;
use liveapi_realtime::{
    FunctionDeclaration, LiveConfig, LiveRunner, MemoryServer, MemoryTransport, RealtimeError, SessionState,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runner: LiveRunner,
    server: MemoryServer,
    input: ManualInput,
    output: ManualOutput,
    handler: RecordingHandler,
}

fn harness() -> Harness {
    let (transport, server) = MemoryTransport::pair();
    let input = ManualInput::default();
    let output = ManualOutput::new(24_000);
    let handler = RecordingHandler::default();

    let runner = LiveRunner::builder()
        .connection(memory_connection())
        .transport(Arc::new(transport))
        .config(LiveConfig::new("m1"))
        .tool_fn(FunctionDeclaration::new("get_current_time"), |_call| Ok(json!({ "time": "12:00:00" })))
        .tool_fn(FunctionDeclaration::new("explode"), |_call| Err(RealtimeError::tool("boom")))
        .input_device(Arc::new(input.clone()))
        .output_device(Arc::new(output.clone()))
        .event_handler(handler.clone())
        .build()
        .unwrap();

    Harness { runner, server, input, output, handler }
}

async fn connect_ready(h: &mut Harness) -> MemoryPeer {
    h.runner.connect().await.unwrap();
    let mut peer = h.server.accept().await.unwrap();
    peer.recv_json().await.unwrap();
    peer.send_json(&json!({ "setupComplete": {} }));
    wait_until("ready", || h.runner.state() == SessionState::Ready).await;
    peer
}

#[tokio::test]
async fn test_sends_before_setup_are_flushed_in_order() {
    let mut h = harness();
    h.runner.connect().await.unwrap();
    let mut peer = h.server.accept().await.unwrap();

    assert!(matches!(h.runner.state(), SessionState::Connecting | SessionState::Connected));
    h.runner.send_text("hello").unwrap();
    h.runner.send_text("again").unwrap();
    assert_eq!(h.runner.pending_sends(), 2);

    let setup = peer.recv_json().await.unwrap();
    assert_eq!(setup["setup"]["model"], "m1");
    let declared: Vec<&str> = setup["setup"]["tools"][0]["functionDeclarations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(declared, vec!["get_current_time", "explode"]);
    assert!(peer.drain().is_empty(), "nothing may follow setup before setupComplete");

    peer.send_json(&json!({ "setupComplete": {} }));
    let first = peer.recv_json().await.unwrap();
    let second = peer.recv_json().await.unwrap();
    assert_eq!(first["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
    assert_eq!(second["clientContent"]["turns"][0]["parts"][0]["text"], "again");
    assert_eq!(h.runner.pending_sends(), 0);
    assert_eq!(h.runner.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_send_while_idle_fails() {
    let h = harness();
    assert_eq!(h.runner.state(), SessionState::Idle);
    assert!(matches!(h.runner.send_text("hello"), Err(RealtimeError::NotConnected)));
    assert!(!h.runner.disconnect().await);
}

#[tokio::test]
async fn test_tool_calls_answered_independently() {
    let mut h = harness();
    let mut peer = connect_ready(&mut h).await;

    peer.send_json(&json!({
        "toolCall": {
            "functionCalls": [
                { "id": "a", "name": "get_current_time", "args": {} },
                { "id": "b", "name": "explode", "args": {} },
                { "id": "c", "name": "search_everything", "args": {} }
            ]
        }
    }));

    let mut responses: HashMap<String, Value> = HashMap::new();
    while responses.len() < 3 {
        let frame = peer.recv_json().await.unwrap();
        for response in frame["toolResponse"]["functionResponses"].as_array().unwrap() {
            responses.insert(response["id"].as_str().unwrap().to_string(), response["response"].clone());
        }
    }

    assert_eq!(responses["a"], json!({ "time": "12:00:00" }));
    assert_eq!(responses["b"], json!({ "error": "Tool execution error: boom" }));
    assert_eq!(responses["c"], json!({ "error": "Unknown function: search_everything" }));
}

#[tokio::test]
async fn test_interrupted_empties_playback_queue() {
    let mut h = harness();
    let peer = connect_ready(&mut h).await;

    for _ in 0..3 {
        peer.send_json(&json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEAAQABAAE=" } }] }
            }
        }));
    }
    wait_until("three queued chunks", || h.runner.queued_audio_chunks() == 3).await;
    assert!(h.runner.is_speaking());
    assert!(h.output.is_open());

    peer.send_json(&json!({ "serverContent": { "interrupted": true } }));
    wait_until("interrupt handled", || h.handler.seen("interrupted")).await;

    assert_eq!(h.runner.queued_audio_chunks(), 0);
    assert!(!h.runner.is_speaking());
    assert!(h.output.render(16).iter().all(|s| *s == 0.0), "no stale audio after interruption");
}

#[tokio::test]
async fn test_turn_complete_drains_then_notifies() {
    let mut h = harness();
    let peer = connect_ready(&mut h).await;

    // Two samples of 0x0100 = 256.
    peer.send_json(&json!({
        "serverContent": {
            "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEAAQ==" } }] },
            "turnComplete": true
        }
    }));
    wait_until("turn complete", || h.handler.seen("turncomplete")).await;
    assert_eq!(h.runner.queued_audio_chunks(), 1);
    assert!(!h.handler.seen("playbackcomplete"));

    let rendered = h.output.render(4);
    assert_eq!(&rendered[..2], &[256.0 / 32768.0, 256.0 / 32768.0]);
    wait_until("playback complete", || h.handler.seen("playbackcomplete")).await;
    assert!(!h.runner.is_speaking());
}

#[tokio::test]
async fn test_microphone_chunks_become_realtime_input() {
    let mut h = harness();
    assert!(matches!(h.runner.start_recording().await, Err(RealtimeError::NotConnected)));

    let mut peer = connect_ready(&mut h).await;
    h.runner.start_recording().await.unwrap();
    h.runner.start_recording().await.unwrap();
    assert_eq!(h.input.opens(), 1);
    assert!(h.runner.is_recording());

    assert!(h.input.feed(&vec![0.25; 2048 + 100]));
    let frame = peer.recv_json().await.unwrap();
    let chunk = &frame["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    // 2048 samples * 2 bytes, base64-encoded
    assert_eq!(chunk["data"].as_str().unwrap().len(), 4096usize.div_ceil(3) * 4);
    wait_until("volume", || h.runner.volume() > 0.0).await;

    assert!(h.runner.stop_recording().await);
    assert!(!h.runner.is_recording());
    assert_eq!(h.runner.volume(), 0.0);
    assert!(!h.input.is_open());
    assert!(peer.drain().is_empty(), "partial chunk is discarded on stop");
}

#[tokio::test]
async fn test_server_close_tears_everything_down() {
    let mut h = harness();
    let peer = connect_ready(&mut h).await;
    h.runner.start_recording().await.unwrap();

    peer.close(Some("going away"));
    wait_until("idle", || h.runner.state() == SessionState::Idle).await;
    wait_until("close callback", || h.handler.seen("close:going away")).await;

    assert!(!h.runner.is_connected());
    assert!(!h.runner.is_recording());
    assert!(!h.input.is_open());
    assert!(matches!(h.runner.send_text("late"), Err(RealtimeError::NotConnected)));
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let mut h = harness();
    let _peer = connect_ready(&mut h).await;

    assert!(h.runner.disconnect().await);
    assert_eq!(h.runner.state(), SessionState::Idle);
    assert!(!h.runner.disconnect().await);

    let _peer = connect_ready(&mut h).await;
    assert!(h.runner.is_connected());
    assert!(h.handler.seen("state:Closing"));
}

#[tokio::test]
async fn test_refused_connect_records_error() {
    let h = harness();
    h.server.refuse_next("no route");

    assert!(h.runner.connect().await.is_err());
    assert_eq!(h.runner.state(), SessionState::Idle);
    assert!(h.runner.last_error().unwrap().contains("no route"));
}

#[tokio::test]
async fn test_logs_are_retained_and_clearable() {
    let mut h = harness();
    let _peer = connect_ready(&mut h).await;

    wait_until("setup log", || h.runner.logs(50).iter().any(|l| l.kind == "server.setupComplete")).await;
    let kinds: Vec<String> = h.runner.logs(50).into_iter().map(|l| l.kind).collect();
    assert_eq!(kinds.first().map(String::as_str), Some("client.open"));

    h.runner.clear_logs();
    assert!(h.runner.logs(50).is_empty());
}

struct MissingOutput;

impl liveapi_realtime::OutputDevice for MissingOutput {
    fn open(
        &self,
        _render: liveapi_realtime::device::RenderCallback,
    ) -> liveapi_realtime::Result<liveapi_realtime::device::OpenedOutput> {
        Err(RealtimeError::device("No speaker available"))
    }
}

#[tokio::test]
async fn test_speaker_failure_keeps_session_alive() {
    let (transport, mut server) = MemoryTransport::pair();
    let handler = RecordingHandler::default();
    let runner = LiveRunner::builder()
        .connection(memory_connection())
        .transport(Arc::new(transport))
        .config(LiveConfig::new("m1"))
        .output_device(Arc::new(MissingOutput))
        .event_handler(handler.clone())
        .build()
        .unwrap();

    runner.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    peer.recv_json().await.unwrap();
    peer.send_json(&json!({ "setupComplete": {} }));
    peer.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm", "data": "AAA=" } }] } }
    }));

    wait_until("device error", || handler.seen("error:Audio device error: No speaker available")).await;
    assert_eq!(runner.state(), SessionState::Ready);
    runner.send_text("still here").unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["clientContent"]["turns"][0]["parts"][0]["text"], "still here");
}

#[tokio::test]
async fn test_close_while_pump_lags_returns_to_idle() {
    let (transport, mut server) = MemoryTransport::pair();
    let handler = SlowLogHandler::default();
    let runner = LiveRunner::builder()
        .connection(memory_connection())
        .transport(Arc::new(transport))
        .config(LiveConfig::new("m1"))
        .event_handler(handler.clone())
        .build()
        .unwrap();

    runner.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    peer.close(Some("API key not valid"));

    wait_until("idle", || runner.state() == SessionState::Idle).await;
    wait_until("close callback", || handler.inner.seen("close:API key not valid")).await;
    assert!(!runner.is_connected());
    assert!(matches!(runner.send_text("hello"), Err(RealtimeError::NotConnected)));
    assert_eq!(runner.pending_sends(), 0);
}

fn slow_runner(transport: SlowTransport, handler: RecordingHandler) -> LiveRunner {
    LiveRunner::builder()
        .connection(memory_connection())
        .transport(Arc::new(transport))
        .config(LiveConfig::new("m1"))
        .event_handler(handler)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_disconnect_cancels_connect_in_flight() {
    let (transport, _server) = MemoryTransport::pair();
    let transport = SlowTransport::new(transport, Duration::from_millis(200));
    let handler = RecordingHandler::default();
    let runner = slow_runner(transport, handler.clone());

    let (connected, disconnected) = tokio::join!(runner.connect(), async {
        wait_until("connecting", || runner.state() == SessionState::Connecting).await;
        runner.disconnect().await
    });

    assert!(!disconnected);
    assert!(matches!(connected, Err(RealtimeError::Cancelled)));
    assert_eq!(runner.state(), SessionState::Idle);
    assert!(!runner.is_connected());
    assert!(runner.last_error().is_none(), "a requested cancel is not an error");
    assert!(handler.seen("state:Closing"));
}

#[tokio::test]
async fn test_concurrent_connects_open_one_transport() {
    let (transport, mut server) = MemoryTransport::pair();
    let transport = SlowTransport::new(transport, Duration::from_millis(50));
    let runner = slow_runner(transport.clone(), RecordingHandler::default());

    let (first, second) = tokio::join!(runner.connect(), runner.connect());
    let outcomes = [first, second];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(r, Err(RealtimeError::AlreadyConnected))));
    assert_eq!(transport.opens(), 1);
    assert_eq!(runner.state(), SessionState::Connected);

    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["setup"]["model"], "m1");
}
