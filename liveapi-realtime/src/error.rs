//! Error types for the live streaming client.

use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur during a live session.
///
/// The variants follow the failure domains of the client: transport failures
/// are fatal to the current connection, decode failures are dropped by the
/// reader, device failures are contained to one pipeline and tool failures are
/// turned into error-shaped responses.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Transport open/send/receive failure.
    #[error("WebSocket connection error: {0}")]
    ConnectionError(String),

    /// Unrecognized or malformed inbound frame.
    #[error("WebSocket message error: {0}")]
    MessageError(String),

    /// Session not connected.
    #[error("Session not connected")]
    NotConnected,

    /// Transport is open but the server has not acknowledged setup yet.
    #[error("Session not ready: setup has not completed")]
    NotReady,

    /// `disconnect` was called while a connect was in flight.
    #[error("Connect cancelled by disconnect")]
    Cancelled,

    /// A connection is already live on this client.
    #[error("Session already connected")]
    AlreadyConnected,

    /// A tool response referenced a call id this connection never received
    /// (or one that was already answered or cancelled).
    #[error("Unknown tool call id: {0}")]
    UnknownToolCall(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio format error.
    #[error("Audio format error: {0}")]
    AudioFormatError(String),

    /// Microphone or speaker acquisition failure.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Tool execution error.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::MessageError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new tool execution error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }
}
