//! Turn-taking state and the values that flow through it

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Monotonic turn identifier used to fence stale stage results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One bounded span of captured speech
///
/// Immutable once created; the samples are shared so the controller can hand
/// them to the transcription stage without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Monotonic sequence number assigned by the detector
    pub sequence: u64,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Channel count (always mono from the detector)
    pub channels: u16,
    /// Captured samples
    pub samples: Arc<[f32]>,
}

impl Utterance {
    /// Create a mono utterance
    #[must_use]
    pub fn new(sequence: u64, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sequence,
            sample_rate,
            channels: 1,
            samples: samples.into(),
        }
    }

    /// Number of sample frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Whether the utterance holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Where the assistant is in the listen/reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssistantState {
    /// Stopped; no capture, no work in flight
    Idle,
    /// Waiting for speech
    Listening,
    /// User is speaking
    SpeechActive,
    /// Utterance submitted for transcription
    Transcribing,
    /// Transcript submitted for a chat completion
    Completing,
    /// Reply being synthesized and played
    Speaking,
    /// Unwinding an active turn because the user barged in
    Interrupting,
}

impl AssistantState {
    /// Whether a remote request is working on the user's input
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Transcribing | Self::Completing)
    }
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::SpeechActive => "speech-active",
            Self::Transcribing => "transcribing",
            Self::Completing => "completing",
            Self::Speaking => "speaking",
            Self::Interrupting => "interrupting",
        };
        f.write_str(name)
    }
}

/// How the user's input reached the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSource {
    /// Spoken utterance
    Voice,
    /// Typed message
    Text,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    /// Reply played to the end; the exchange is part of the transcript
    Committed,
    /// Superseded, stopped, or playback cut short; nothing committed
    Interrupted,
    /// A stage failed or a gate rejected the input; nothing committed
    Aborted,
}

/// One user-input-to-assistant-output cycle
#[derive(Debug, Clone)]
pub struct Turn {
    /// Fencing identifier
    pub id: TurnId,
    /// Input channel
    pub source: TurnSource,
    /// Stage the turn is in
    pub state: AssistantState,
    /// User text once known
    pub transcript: Option<String>,
    /// Assistant text once known
    pub reply: Option<String>,
    /// Set once the turn has been superseded or stopped
    pub canceled: bool,
}

impl Turn {
    /// Create a turn at its first stage
    #[must_use]
    pub const fn new(id: TurnId, source: TurnSource, state: AssistantState) -> Self {
        Self {
            id,
            source,
            state,
            transcript: None,
            reply: None,
            canceled: false,
        }
    }
}
