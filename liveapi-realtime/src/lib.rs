//! # liveapi-realtime
//!
//! Bidirectional streaming client for the Gemini Live API.
//!
//! The crate keeps one long-lived session with the live service while it
//! captures microphone audio and plays model audio back without gaps.
//!
//! ## Architecture
//!
//! ```text
//!   microphone ──► AudioRecorder ──┐                 ┌──► AudioStreamer ──► speaker
//!                                  ▼                 │
//!                              LiveRunner ◄──────────┤──► ToolHandler
//!                                  │                 │
//!                                  ▼                 │
//!                              LiveClient ◄──► Transport ◄──► live service
//! ```
//!
//! - [`LiveClient`] owns the connection, sends `setup` first, serializes
//!   outgoing messages and classifies incoming frames into [`LiveEvent`]s.
//! - [`AudioRecorder`] turns microphone samples into 2048-sample PCM16
//!   chunks and a volume level.
//! - [`AudioStreamer`] schedules model audio back to back, drains on turn
//!   completion and cuts over immediately on interruption.
//! - [`LiveRunner`] ties them together and executes tool calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use liveapi_realtime::{ConnectionConfig, FunctionDeclaration, LiveConfig, LiveRunner};
//!
//! #[tokio::main]
//! async fn main() -> liveapi_realtime::Result<()> {
//!     let runner = LiveRunner::builder()
//!         .connection(ConnectionConfig::new(std::env::var("GOOGLE_API_KEY").unwrap_or_default()))
//!         .config(LiveConfig::new("models/gemini-2.0-flash-exp").with_voice("Aoede"))
//!         .tool_fn(
//!             FunctionDeclaration::new("get_current_time").with_description("Get the current time"),
//!             |_call| Ok(serde_json::json!({ "time": "12:00:00" })),
//!         )
//!         .build()?;
//!
//!     runner.connect().await?;
//!     runner.send_text("What time is it?")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `desktop-audio`: microphone and speaker access through `cpal`
//!   ([`device::CpalInput`], [`device::CpalOutput`]).

pub mod audio;
pub mod capture;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod playback;
pub mod protocol;
pub mod runner;
pub mod transport;

// Re-exports
pub use audio::{AudioEncoding, AudioFormat};
pub use capture::{AudioRecorder, CaptureEvent};
pub use client::{EventReceiver, LiveClient};
pub use config::{
    ConnectionConfig, FunctionDeclaration, GenerationConfig, LiveConfig, LiveConfigBuilder, Modality, Tool,
};
pub use device::{ActiveStream, InputDevice, NullOutput, OutputDevice};
pub use error::{RealtimeError, Result};
pub use events::{LiveEvent, LogBuffer, LogMessage, StreamingLog};
pub use playback::{AudioStreamer, PlaybackEvent, PlaybackState};
pub use protocol::{Blob, ClientMessage, Content, FunctionCall, FunctionResponse, Part, ServerMessage};
pub use runner::{EventHandler, FnToolHandler, LiveRunner, LiveRunnerBuilder, SessionState, ToolHandler};
pub use transport::{Frame, MemoryServer, MemoryTransport, Transport, WebSocketTransport};
