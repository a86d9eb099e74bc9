//! Events emitted by the protocol engine, and the streaming log.
//!
//! Every inbound frame is classified into exactly one [`LiveEvent`] kind (or
//! several, for a model turn that mixes audio and other parts). Consumers
//! match on the enum, so a new message kind is a compile error in every
//! dispatcher rather than a silently ignored string.

use crate::protocol::{FunctionCall, Part};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Number of log entries retained by [`LogBuffer`].
pub const LOG_RETENTION: usize = 100;

/// Events emitted by [`crate::client::LiveClient`].
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Transport opened; setup has been queued.
    Open {
        /// Id of the new connection.
        session_id: String,
    },
    /// Transport closed.
    Close {
        /// Id of the connection that closed.
        session_id: String,
        /// Close reason, if the peer sent one.
        reason: Option<String>,
    },
    /// Fatal transport failure.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Observability record.
    Log(StreamingLog),
    /// One decoded PCM16 audio part.
    Audio(Bytes),
    /// Non-audio parts of a model turn, in original order.
    Content(Vec<Part>),
    /// Function calls to execute.
    ToolCall(Vec<FunctionCall>),
    /// Calls the model no longer wants answered.
    ToolCallCancellation(Vec<String>),
    /// Setup acknowledged; application traffic may flow.
    SetupComplete,
    /// The model finished its turn; playback should drain.
    TurnComplete,
    /// The model abandoned its turn; playback must stop now.
    Interrupted,
}

impl LiveEvent {
    /// Event name, matching the collaborator-facing event vocabulary.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Error { .. } => "error",
            Self::Log(_) => "log",
            Self::Audio(_) => "audio",
            Self::Content(_) => "content",
            Self::ToolCall(_) => "toolcall",
            Self::ToolCallCancellation(_) => "toolcallcancellation",
            Self::SetupComplete => "setupcomplete",
            Self::TurnComplete => "turncomplete",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Payload of a log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogMessage {
    /// Free-form text.
    Text(String),
    /// A wire message.
    Json(Value),
}

impl From<&str> for LogMessage {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for LogMessage {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

/// One streaming log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingLog {
    /// When the entry was recorded.
    pub date: DateTime<Utc>,
    /// Category such as `client.send` or `server.audio`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload.
    pub message: LogMessage,
}

impl StreamingLog {
    /// Create an entry stamped now.
    pub fn new(kind: impl Into<String>, message: impl Into<LogMessage>) -> Self {
        Self { date: Utc::now(), kind: kind.into(), message: message.into() }
    }
}

/// Append-only ring of recent log entries.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<StreamingLog>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_RETENTION)
    }
}

impl LogBuffer {
    /// Create a buffer retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    /// Append an entry, dropping the oldest past capacity.
    pub fn push(&mut self, entry: StreamingLog) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<StreamingLog> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Strip the `...ERROR]` prelude servers put in front of error close reasons.
pub(crate) fn trim_close_reason(reason: &str) -> String {
    const PRELUDE: &str = "ERROR]";
    if reason.to_lowercase().contains("error") {
        if let Some(idx) = reason.find(PRELUDE).filter(|idx| *idx > 0) {
            return reason[idx + PRELUDE.len()..].trim_start().to_string();
        }
    }
    reason.to_string()
}
