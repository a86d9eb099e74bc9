//! Wire messages exchanged with the live service.
//!
//! Frames are JSON objects keyed by a single discriminant: `setup`,
//! `clientContent`, `realtimeInput` and `toolResponse` going out;
//! `setupComplete`, `serverContent`, `toolCall` and `toolCallCancellation`
//! coming in.

use crate::config::LiveConfig;
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Mime prefix that marks an inline part as playable PCM audio.
pub const AUDIO_PCM_MIME_PREFIX: &str = "audio/pcm";

/// Inline binary payload (base64 on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Mime type, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

impl Blob {
    /// Create a new blob.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    /// Whether this blob carries PCM audio.
    pub fn is_audio_pcm(&self) -> bool {
        self.mime_type.starts_with(AUDIO_PCM_MIME_PREFIX)
    }
}

/// Atomic unit of a turn.
///
/// Parts other than text and inline data (executable code, function calls)
/// are kept verbatim in `other` so they survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline data fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Any other part fields.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Part {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    /// An inline data part.
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { inline_data: Some(Blob::new(mime_type, data)), ..Default::default() }
    }

    /// Whether this part is inline PCM audio.
    pub fn is_audio(&self) -> bool {
        self.inline_data.as_ref().is_some_and(Blob::is_audio_pcm)
    }
}

/// A turn: role plus ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`; omitted for system instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ordered parts.
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn.
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: Some("user".to_string()), parts }
    }

    /// A role-less content block (system instructions).
    pub fn system(parts: Vec<Part>) -> Self {
        Self { role: None, parts }
    }
}

/// `clientContent` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Content turns, in order.
    pub turns: Vec<Content>,
    /// Whether the model should respond now.
    pub turn_complete: bool,
}

/// `realtimeInput` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Streamed media chunks.
    pub media_chunks: Vec<Blob>,
}

/// One answered function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Id of the call being answered.
    pub id: String,
    /// Result payload; always a JSON object on the wire.
    pub response: Value,
}

impl FunctionResponse {
    /// Create a response, wrapping non-object results as `{"result": ...}`.
    pub fn new(id: impl Into<String>, response: Value) -> Self {
        let response = match response {
            Value::Object(_) => response,
            other => json!({ "result": other }),
        };
        Self { id: id.into(), response }
    }

    /// Create an error-shaped response.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), response: json!({ "error": message.into() }) }
    }
}

/// `toolResponse` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Answered calls.
    pub function_responses: Vec<FunctionResponse>,
}

/// Messages sent from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration; first frame of every connection.
    Setup(LiveConfig),
    /// Conversational turns.
    ClientContent(ClientContent),
    /// Streamed media.
    RealtimeInput(RealtimeInput),
    /// Tool results.
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Wrap parts into a single user turn.
    pub fn content(parts: Vec<Part>, turn_complete: bool) -> Self {
        Self::ClientContent(ClientContent { turns: vec![Content::user(parts)], turn_complete })
    }

    /// Wrap media chunks.
    pub fn realtime_input(media_chunks: Vec<Blob>) -> Self {
        Self::RealtimeInput(RealtimeInput { media_chunks })
    }

    /// Wrap tool responses.
    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }

    /// Short name used in log categories.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::ClientContent(_) => "clientContent",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call id, echoed back in the response.
    #[serde(default)]
    pub id: String,
    /// Function name.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub args: Value,
}

/// `toolCall` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Requested calls.
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// `toolCallCancellation` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    /// Ids of calls the client should no longer answer.
    #[serde(default)]
    pub ids: Vec<String>,
}

/// `modelTurn` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    /// Generated parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// `serverContent` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Generated content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// The model finished its turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    /// The model abandoned its turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

impl ServerContent {
    /// Whether the turn was interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }

    /// Whether the turn completed.
    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete.unwrap_or(false)
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Setup acknowledged.
    SetupComplete,
    /// Model output or turn signalling.
    ServerContent(ServerContent),
    /// Function calls to execute.
    ToolCall(ToolCall),
    /// Calls to abandon.
    ToolCallCancellation(ToolCallCancellation),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default)]
    tool_call: Option<ToolCall>,
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call_cancellation: Option<ToolCallCancellation>,
}

impl ServerMessage {
    /// Decode a text frame.
    pub fn decode(raw: &str) -> Result<Self> {
        let msg: RawServerMessage = serde_json::from_str(raw)
            .map_err(|e| RealtimeError::protocol(format!("Parse error: {e}")))?;

        if let Some(tool_call) = msg.tool_call {
            return Ok(Self::ToolCall(tool_call));
        }
        if msg.setup_complete.is_some() {
            return Ok(Self::SetupComplete);
        }
        if let Some(content) = msg.server_content {
            return Ok(Self::ServerContent(content));
        }
        if let Some(cancellation) = msg.tool_call_cancellation {
            return Ok(Self::ToolCallCancellation(cancellation));
        }
        Err(RealtimeError::protocol("no known message key"))
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            RealtimeError::protocol(format!("Invalid UTF-8 in binary message: {e}"))
        })?;
        Self::decode(text)
    }
}

/// Describe a realtime-input batch for logging: `audio`, `video`,
/// `audio + video` or `unknown`.
pub fn classify_media(chunks: &[Blob]) -> &'static str {
    let has_audio = chunks.iter().any(|c| c.mime_type.starts_with("audio/"));
    let has_video =
        chunks.iter().any(|c| c.mime_type.starts_with("image/") || c.mime_type.starts_with("video/"));
    match (has_audio, has_video) {
        (true, true) => "audio + video",
        (true, false) => "audio",
        (false, true) => "video",
        (false, false) => "unknown",
    }
}
