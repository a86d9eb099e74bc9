//! Application settings.
//!
//! Precedence, lowest first: built-in defaults, the TOML settings file,
//! environment, command-line flags.

use crate::cli::{Cli, ResponseMode};
use anyhow::{Context, Result};
use liveapi_realtime::config::DEFAULT_MODEL;
use liveapi_realtime::{ConnectionConfig, LiveConfig};
use serde::Deserialize;
use std::path::Path;

/// Voice used when none is configured.
pub const DEFAULT_VOICE: &str = "Aoede";

/// System instruction used when none is configured.
pub const DEFAULT_INSTRUCTION: &str = "You are a helpful voice assistant. Keep answers short and conversational. \
     Use the get_current_time tool when the user asks for the time.";

/// Settings as they appear in the TOML file. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instruction: Option<String>,
    pub response: Option<ResponseMode>,
    pub temperature: Option<f32>,
    pub url: Option<String>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub instruction: String,
    pub response: ResponseMode,
    pub temperature: Option<f32>,
    pub url: Option<String>,
}

impl AppConfig {
    /// Resolve settings from flags, the settings file and the environment.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };
        let api_key = api_key_from_env()?;
        Ok(Self::resolve(cli, file, api_key))
    }

    pub fn resolve(cli: &Cli, file: FileSettings, api_key: String) -> Self {
        Self {
            api_key,
            model: cli.model.clone().or(file.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: cli.voice.clone().or(file.voice).unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            instruction: cli
                .instruction
                .clone()
                .or(file.instruction)
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            response: cli.response.or(file.response).unwrap_or(ResponseMode::Audio),
            temperature: file.temperature,
            url: cli.url.clone().or(file.url),
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        let connection = ConnectionConfig::new(self.api_key.clone());
        match &self.url {
            Some(url) => connection.with_url(url.clone()),
            None => connection,
        }
    }

    /// Session configuration sent in `setup`. Tools are declared by the
    /// runner builder.
    pub fn live_config(&self) -> LiveConfig {
        let mut config = LiveConfig::new(self.model.clone())
            .with_instruction(self.instruction.clone())
            .with_modality(self.response.into());
        if self.response == ResponseMode::Audio {
            config = config.with_voice(self.voice.clone());
        }
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        config
    }
}

fn api_key_from_env() -> Result<String> {
    std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY or GEMINI_API_KEY environment variable not set"))
}
