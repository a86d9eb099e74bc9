use anyhow::{Context, Result};
use clap::Parser;
use liveapi_cli::cli::{Cli, Commands};
use liveapi_cli::config::AppConfig;
use liveapi_cli::console::{ConsoleHandler, run_console};
use liveapi_cli::telemetry::init_telemetry;
use liveapi_realtime::config::LIVE_VOICES;
use std::time::Duration;

/// Longest wait for a reply in `ask` mode.
const ASK_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    let cli = Cli::parse();
    init_telemetry("warn,liveapi_realtime=info");

    if let Some(Commands::Voices) = cli.command {
        for voice in LIVE_VOICES {
            println!("{voice}");
        }
        return Ok(());
    }

    let config = AppConfig::load(&cli)?;
    let handler = ConsoleHandler::new();
    let runner = liveapi_cli::runner_builder(&config)
        .event_handler(handler.clone())
        .build()
        .context("failed to build live session")?;

    runner.connect().await.context("failed to connect")?;

    let outcome = match cli.command {
        Some(Commands::Ask { prompt }) => {
            let finished = handler.turn_finished();
            runner.send_text(prompt.join(" "))?;
            let replied = tokio::time::timeout(ASK_TIMEOUT, finished).await.is_ok();
            while replied && runner.is_speaking() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if replied { Ok(()) } else { Err(anyhow::anyhow!("no reply within {}s", ASK_TIMEOUT.as_secs())) }
        }
        _ => run_console(&runner).await,
    };

    runner.disconnect().await;
    outcome
}
