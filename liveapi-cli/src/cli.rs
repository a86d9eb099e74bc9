//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "liveapi")]
#[command(author, version, about = "Talk to Gemini Live from the terminal", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file (TOML)
    #[arg(short, long, global = true, env = "LIVEAPI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model name, e.g. models/gemini-2.0-flash-exp
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Prebuilt voice
    #[arg(long, global = true)]
    pub voice: Option<String>,

    /// System instruction
    #[arg(long, global = true)]
    pub instruction: Option<String>,

    /// Response modality
    #[arg(long, value_enum, global = true)]
    pub response: Option<ResponseMode>,

    /// Override the service endpoint
    #[arg(long, global = true)]
    pub url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session with text turns and microphone toggle (default)
    Console,

    /// Send one text turn and print the reply
    Ask {
        /// Message to send
        #[arg(required = true)]
        prompt: Vec<String>,
    },

    /// List prebuilt voices
    Voices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Spoken replies
    Audio,
    /// Text replies
    Text,
}

impl From<ResponseMode> for liveapi_realtime::Modality {
    fn from(mode: ResponseMode) -> Self {
        match mode {
            ResponseMode::Audio => Self::Audio,
            ResponseMode::Text => Self::Text,
        }
    }
}
