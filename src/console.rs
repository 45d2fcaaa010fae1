//! Terminal front end: renders assistant events and parses typed input

use std::io::Write;

use crate::turn::{AssistantEvent, AssistantState, EventSink, Severity, TurnOutcome};

/// Line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Message for the assistant
    Say(String),
    /// Start listening
    Start,
    /// Stop listening and cancel the active turn
    Stop,
    /// Mute the microphone
    Mute,
    /// Unmute the microphone
    Unmute,
    /// Clear the conversation
    Reset,
    /// Print the command list
    Help,
    /// Leave
    Quit,
}

/// Help text for the interactive prompt
pub const HELP: &str = "\
Type a message and press enter to send it.
  /start   start listening
  /stop    stop listening
  /mute    mute the microphone
  /unmute  unmute the microphone
  /reset   clear the conversation
  /quit    exit";

/// Parse one input line; blank lines yield `None`, unknown commands show help
#[must_use]
pub fn parse_line(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(command) = line.strip_prefix('/') else {
        return Some(ConsoleCommand::Say(line.to_string()));
    };

    match command.trim().to_ascii_lowercase().as_str() {
        "start" => Some(ConsoleCommand::Start),
        "stop" => Some(ConsoleCommand::Stop),
        "mute" => Some(ConsoleCommand::Mute),
        "unmute" => Some(ConsoleCommand::Unmute),
        "reset" => Some(ConsoleCommand::Reset),
        "help" | "?" => Some(ConsoleCommand::Help),
        "quit" | "exit" => Some(ConsoleCommand::Quit),
        other => {
            tracing::debug!(command = other, "unknown console command");
            Some(ConsoleCommand::Help)
        }
    }
}

/// Format an event for the terminal; `None` for events that stay silent
#[must_use]
pub fn render(event: &AssistantEvent) -> Option<String> {
    match event {
        AssistantEvent::TranscriptReady { text, .. } => Some(format!("you    > {text}")),
        AssistantEvent::ReplyReady { text, .. } => Some(format!("parley > {text}")),
        AssistantEvent::Info { text, severity } => {
            let tag = match severity {
                Severity::Info => "info",
                Severity::Success => "ok",
                Severity::Warning => "warn",
                Severity::Error => "error",
            };
            Some(format!("[{tag}] {text}"))
        }
        AssistantEvent::StateChanged {
            state: AssistantState::SpeechActive,
        } => Some("(listening to you...)".to_string()),
        AssistantEvent::TurnFinished {
            outcome: TurnOutcome::Interrupted,
            turn,
        } => Some(format!("(turn {turn} interrupted)")),
        AssistantEvent::TurnStarted { .. }
        | AssistantEvent::UtteranceAccepted { .. }
        | AssistantEvent::StatusChanged(_)
        | AssistantEvent::TurnFinished { .. }
        | AssistantEvent::StateChanged { .. } => None,
    }
}

/// Prints events to stdout
#[derive(Debug, Default)]
pub struct ConsoleRenderer;

impl ConsoleRenderer {
    /// Create a renderer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for ConsoleRenderer {
    fn emit(&self, event: AssistantEvent) {
        tracing::trace!(?event, "event");
        if let Some(line) = render(&event) {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    }
}
