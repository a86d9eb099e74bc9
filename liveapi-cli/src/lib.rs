//! # liveapi-cli
//!
//! Terminal front end for Gemini Live sessions.
//!
//! - [`config`] resolves settings from flags, a TOML file and the environment
//! - [`console`] runs the interactive prompt
//! - [`tools`] holds the built-in function tools
//! - [`telemetry`] sets up logging

pub mod cli;
pub mod config;
pub mod console;
pub mod telemetry;
pub mod tools;

use liveapi_realtime::{LiveRunner, LiveRunnerBuilder};

/// Runner builder with the application's connection, config, tools and
/// devices. Without `desktop-audio`, playback is rendered silently.
pub fn runner_builder(config: &config::AppConfig) -> LiveRunnerBuilder {
    let builder = LiveRunner::builder().connection(config.connection()).config(config.live_config());
    let builder = tools::register(builder);
    with_devices(builder)
}

#[cfg(feature = "desktop-audio")]
fn with_devices(builder: LiveRunnerBuilder) -> LiveRunnerBuilder {
    use liveapi_realtime::device::{CpalInput, CpalOutput};
    use std::sync::Arc;

    builder.input_device(Arc::new(CpalInput)).output_device(Arc::new(CpalOutput))
}

#[cfg(not(feature = "desktop-audio"))]
fn with_devices(builder: LiveRunnerBuilder) -> LiveRunnerBuilder {
    builder
}
