//! Events emitted to the rendering collaborator
//!
//! The controller never reads anything back from a sink; every observable
//! change in the conversation is one of these events.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use super::state::{AssistantState, TurnId, TurnOutcome};

/// Severity of an informational message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Neutral notice
    Info,
    /// Something the user asked for succeeded
    Success,
    /// Degraded but recoverable
    Warning,
    /// A stage failed
    Error,
}

/// Indicator flags for the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Detector is emitting speech events
    pub listening: bool,
    /// Reply is being synthesized or played
    pub speaking: bool,
    /// Transcription or completion in flight
    pub processing: bool,
    /// Microphone track disabled
    pub muted: bool,
}

/// Discrete event describing a change in the conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// A turn was created
    TurnStarted {
        /// New turn
        turn: TurnId,
    },
    /// An utterance passed the length check and will be transcribed
    UtteranceAccepted {
        /// Owning turn
        turn: TurnId,
        /// Detector sequence number
        sequence: u64,
        /// Audio length
        #[serde(with = "millis")]
        duration: Duration,
    },
    /// The user's words are known
    TranscriptReady {
        /// Owning turn
        turn: TurnId,
        /// Transcribed or typed text
        text: String,
    },
    /// The assistant's reply is known
    ReplyReady {
        /// Owning turn
        turn: TurnId,
        /// Reply text
        text: String,
    },
    /// Indicator flags changed
    StatusChanged(Status),
    /// Message for the user
    Info {
        /// Message text
        text: String,
        /// How to present it
        severity: Severity,
    },
    /// A turn ended
    TurnFinished {
        /// Finished turn
        turn: TurnId,
        /// How it ended
        outcome: TurnOutcome,
    },
    /// The controller moved to a new state
    StateChanged {
        /// State entered
        state: AssistantState,
    },
}

impl AssistantEvent {
    /// Informational message
    #[must_use]
    pub fn info(text: impl Into<String>, severity: Severity) -> Self {
        Self::Info {
            text: text.into(),
            severity,
        }
    }

    /// Turn the event belongs to, if any
    #[must_use]
    pub const fn turn(&self) -> Option<TurnId> {
        match self {
            Self::TurnStarted { turn }
            | Self::UtteranceAccepted { turn, .. }
            | Self::TranscriptReady { turn, .. }
            | Self::ReplyReady { turn, .. }
            | Self::TurnFinished { turn, .. } => Some(*turn),
            Self::StatusChanged(_) | Self::Info { .. } | Self::StateChanged { .. } => None,
        }
    }
}

/// Receives controller events
pub trait EventSink: Send + Sync {
    /// Handle one event; must not block
    fn emit(&self, event: AssistantEvent);
}

impl EventSink for mpsc::UnboundedSender<AssistantEvent> {
    fn emit(&self, event: AssistantEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(event);
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
