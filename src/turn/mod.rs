//! Turn taking: the interruption-aware conversation state machine
//!
//! A [`TurnController`] owns the [`Session`] and drives one turn at a time
//! through transcription, completion, and speech. Every stage result is
//! tagged with the turn that requested it; results for a turn that is no
//! longer active are discarded.

mod controller;
mod events;
mod session;
mod state;

pub use controller::{
    AssistantHandle, Collaborators, DEFAULT_END_PHRASE, DEFAULT_MIN_UTTERANCE_SAMPLES,
    DEFAULT_PLAYBACK_TIMEOUT, DEFAULT_RESTART_DELAY, Snapshot, TurnController, TurnPolicy,
};
pub use events::{AssistantEvent, EventSink, Severity, Status};
pub use session::{Exchange, Session};
pub use state::{AssistantState, Turn, TurnId, TurnOutcome, TurnSource, Utterance};
