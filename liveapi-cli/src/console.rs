//! Interactive console session.

use anyhow::Result;
use async_trait::async_trait;
use liveapi_realtime::{EventHandler, FunctionCall, LiveRunner, Part, SessionState};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Entries shown by `/logs`.
pub const RECENT_LOGS: usize = 50;

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Say(String),
    StartMic,
    StopMic,
    Logs,
    ClearLogs,
    Status,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if !line.starts_with('/') {
            return Self::Say(line.to_string());
        }
        match line {
            "/mic" => Self::StartMic,
            "/stop" => Self::StopMic,
            "/logs" => Self::Logs,
            "/clear" => Self::ClearLogs,
            "/status" => Self::Status,
            "/help" | "/?" => Self::Help,
            "/quit" | "/exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "\
  <text>    send a text turn
  /mic      start streaming the microphone
  /stop     stop the microphone
  /logs     show recent protocol log
  /clear    clear the protocol log
  /status   show session state
  /quit     disconnect and exit";

/// Prints model output and session changes to the terminal.
#[derive(Default, Clone)]
pub struct ConsoleHandler {
    turn_done: Arc<Notify>,
}

impl ConsoleHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves at the next `turnComplete`, interruption or close. Create it
    /// before sending the turn.
    pub fn turn_finished(&self) -> Notified<'_> {
        self.turn_done.notified()
    }
}

#[async_trait]
impl EventHandler for ConsoleHandler {
    async fn on_close(&self, reason: Option<&str>) -> liveapi_realtime::Result<()> {
        match reason {
            Some(reason) => println!("\n[session closed: {reason}]"),
            None => println!("\n[session closed]"),
        }
        self.turn_done.notify_waiters();
        Ok(())
    }

    async fn on_error(&self, message: &str) -> liveapi_realtime::Result<()> {
        eprintln!("\n[error] {message}");
        Ok(())
    }

    async fn on_content(&self, parts: &[Part]) -> liveapi_realtime::Result<()> {
        for text in parts.iter().filter_map(|p| p.text.as_deref()) {
            print!("{text}");
        }
        let _ = std::io::stdout().flush();
        Ok(())
    }

    async fn on_tool_call(&self, calls: &[FunctionCall]) -> liveapi_realtime::Result<()> {
        for call in calls {
            println!("\n[tool] {}({})", call.name, call.args);
        }
        Ok(())
    }

    async fn on_turn_complete(&self) -> liveapi_realtime::Result<()> {
        println!();
        self.turn_done.notify_waiters();
        Ok(())
    }

    async fn on_interrupted(&self) -> liveapi_realtime::Result<()> {
        println!("\n[interrupted]");
        self.turn_done.notify_waiters();
        Ok(())
    }

    async fn on_state_change(&self, state: SessionState) -> liveapi_realtime::Result<()> {
        tracing::info!(?state, "Session state changed");
        Ok(())
    }
}

/// Read lines until `/quit` or end of input.
pub async fn run_console(runner: &LiveRunner) -> Result<()> {
    let mut editor = DefaultEditor::new()?;

    println!("Gemini Live console ({})", runner.config().model);
    println!("Type a message and press Enter. /help lists commands.\n");

    loop {
        let (returned, line) = tokio::task::spawn_blocking(move || {
            let line = editor.readline("You -> ");
            (editor, line)
        })
        .await?;
        editor = returned;

        let line = match line {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let _ = editor.add_history_entry(line.as_str());

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Say(text) => {
                if let Err(e) = runner.send_text(text) {
                    eprintln!("[error] {e}");
                }
            }
            ConsoleCommand::StartMic => match runner.start_recording().await {
                Ok(()) => println!("[microphone on]"),
                Err(e) => eprintln!("[error] {e}"),
            },
            ConsoleCommand::StopMic => {
                if runner.stop_recording().await {
                    println!("[microphone off]");
                }
            }
            ConsoleCommand::Logs => {
                for entry in runner.logs(RECENT_LOGS) {
                    println!("{} {:<22} {}", entry.date.format("%H:%M:%S%.3f"), entry.kind, entry.message);
                }
            }
            ConsoleCommand::ClearLogs => runner.clear_logs(),
            ConsoleCommand::Status => {
                println!(
                    "state={:?} recording={} speaking={} queued_audio={}",
                    runner.state(),
                    runner.is_recording(),
                    runner.is_speaking(),
                    runner.queued_audio_chunks()
                );
                if let Some(error) = runner.last_error() {
                    println!("last error: {error}");
                }
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(cmd) => eprintln!("unknown command {cmd}; try /help"),
        }
    }

    Ok(())
}
