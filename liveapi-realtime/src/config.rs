//! Configuration types for live sessions.
//!
//! [`LiveConfig`] is the body of the `setup` frame and is fixed for the
//! lifetime of a connection. [`ConnectionConfig`] describes where to connect
//! and with which credential; both are supplied by the application.

use crate::error::{RealtimeError, Result};
use crate::protocol::{Content, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Public Gemini Live WebSocket endpoint.
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Default model for live sessions.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Prebuilt voices accepted by the live models.
pub const LIVE_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Response modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    /// Text parts.
    Text,
    /// Inline PCM audio parts.
    #[default]
    Audio,
    /// Inline image parts.
    Image,
}

/// Prebuilt voice selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice configuration.
    pub voice_config: VoiceConfig,
}

/// Voice configuration wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// The prebuilt voice.
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Name of a prebuilt voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, e.g. `"Aoede"`.
    pub voice_name: String,
}

impl SpeechConfig {
    /// Select a prebuilt voice by name.
    pub fn voice(name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: name.into() },
            },
        }
    }

    /// The selected voice name.
    pub fn voice_name(&self) -> &str {
        &self.voice_config.prebuilt_voice_config.voice_name
    }
}

/// Generation options sent with setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Requested output modalities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<Modality>,

    /// Voice selection for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Maximum output tokens per turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name; tool calls are routed by this name.
    pub name: String,
    /// What the function does.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: Value,
}

impl FunctionDeclaration {
    /// Create a declaration with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// An entry of the tool catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    /// Client-executed functions.
    FunctionDeclarations(Vec<FunctionDeclaration>),
    /// Server-side Google Search grounding.
    GoogleSearch {},
    /// Server-side code execution.
    CodeExecution {},
}

/// Session configuration, sent once as the `setup` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Remote model identity, e.g. `models/gemini-2.0-flash-exp`.
    pub model: String,

    /// System instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Generation options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// Declared tool catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl LiveConfig {
    /// Create a configuration for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), system_instruction: None, generation_config: None, tools: Vec::new() }
    }

    /// Create a builder.
    pub fn builder(model: impl Into<String>) -> LiveConfigBuilder {
        LiveConfigBuilder { config: Self::new(model) }
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(Content::system(vec![Part::text(instruction)]));
        self
    }

    /// Set the prebuilt voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.generation_mut().speech_config = Some(SpeechConfig::voice(voice));
        self
    }

    /// Set the response modality.
    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.generation_mut().response_modalities = vec![modality];
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.generation_mut().temperature = Some(temperature);
        self
    }

    /// Declare a client-executed function, grouping with earlier declarations.
    pub fn with_function(mut self, declaration: FunctionDeclaration) -> Self {
        let existing = self.tools.iter_mut().find_map(|tool| match tool {
            Tool::FunctionDeclarations(decls) => Some(decls),
            _ => None,
        });
        match existing {
            Some(decls) => decls.push(declaration),
            None => self.tools.push(Tool::FunctionDeclarations(vec![declaration])),
        }
        self
    }

    /// Add a catalog entry as-is.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// All declared client-side function names.
    pub fn function_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter_map(|tool| match tool {
                Tool::FunctionDeclarations(decls) => Some(decls),
                _ => None,
            })
            .flatten()
            .map(|decl| decl.name.as_str())
            .collect()
    }

    /// The configured voice, if any.
    pub fn voice(&self) -> Option<&str> {
        self.generation_config.as_ref()?.speech_config.as_ref().map(SpeechConfig::voice_name)
    }

    /// Check the configuration before it is sent.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RealtimeError::config("model must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for name in self.function_names() {
            if !seen.insert(name) {
                return Err(RealtimeError::config(format!("duplicate function declaration: {name}")));
            }
        }
        Ok(())
    }

    fn generation_mut(&mut self) -> &mut GenerationConfig {
        self.generation_config.get_or_insert_with(GenerationConfig::default)
    }
}

/// Builder for [`LiveConfig`].
#[derive(Debug, Clone)]
pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl LiveConfigBuilder {
    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config = self.config.with_instruction(instruction);
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config = self.config.with_voice(voice);
        self
    }

    /// Set the response modality.
    pub fn modality(mut self, modality: Modality) -> Self {
        self.config = self.config.with_modality(modality);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config = self.config.with_temperature(temperature);
        self
    }

    /// Declare a function.
    pub fn function(mut self, declaration: FunctionDeclaration) -> Self {
        self.config = self.config.with_function(declaration);
        self
    }

    /// Add a catalog entry.
    pub fn tool(mut self, tool: Tool) -> Self {
        self.config = self.config.with_tool(tool);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> LiveConfig {
        self.config
    }
}

/// Where to connect and with which credential.
#[derive(Clone)]
pub struct ConnectionConfig {
    url: Option<String>,
    api_key: SecretString,
}

impl ConnectionConfig {
    /// Connect to the default endpoint with an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { url: None, api_key: SecretString::from(api_key.into()) }
    }

    /// Override the endpoint (proxies, regional endpoints, test servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The endpoint without credentials, safe to log.
    pub fn endpoint(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_LIVE_URL)
    }

    /// Full WebSocket URL including the `key` query parameter.
    pub fn websocket_url(&self) -> Result<String> {
        let mut url = url::Url::parse(self.endpoint())
            .map_err(|e| RealtimeError::config(format!("invalid endpoint url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss" | "memory") {
            return Err(RealtimeError::config(format!("unsupported url scheme: {}", url.scheme())));
        }
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url.into())
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
