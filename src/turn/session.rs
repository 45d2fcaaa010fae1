//! Conversation session: credential, committed transcript, active turn

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use super::state::{AssistantState, Turn, TurnId, TurnSource};
use crate::agent::ChatMessage;

/// One committed user/assistant pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Turn that produced the pair
    pub turn: TurnId,
    /// What the user said or typed
    pub user: String,
    /// What the assistant replied
    pub assistant: String,
    /// When the reply finished playing
    pub committed_at: DateTime<Utc>,
}

/// Process-wide conversation state owned by the turn controller
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    credential: Option<Arc<SecretString>>,
    transcript: Vec<Exchange>,
    active: Option<Turn>,
    next_turn: u64,
}

impl Session {
    /// Create a session with an optional API credential
    #[must_use]
    pub fn new(credential: Option<SecretString>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, has_credential = credential.is_some(), "session created");
        Self {
            id,
            credential: credential.map(Arc::new),
            transcript: Vec::new(),
            active: None,
            next_turn: 1,
        }
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// API credential, if configured
    #[must_use]
    pub fn credential(&self) -> Option<Arc<SecretString>> {
        self.credential.clone()
    }

    /// Create and activate a new turn
    ///
    /// Turn ids are never reused, even across [`Self::clear_history`]. Any
    /// previously active turn is replaced; the caller finishes it first.
    pub fn begin_turn(&mut self, source: TurnSource, state: AssistantState) -> TurnId {
        let id = TurnId(self.next_turn);
        self.next_turn += 1;
        if let Some(stale) = self.active.replace(Turn::new(id, source, state)) {
            tracing::warn!(stale = %stale.id, turn = %id, "active turn replaced without finishing");
        }
        id
    }

    /// Currently active turn
    #[must_use]
    pub const fn active(&self) -> Option<&Turn> {
        self.active.as_ref()
    }

    /// Currently active turn, if it is `turn`
    pub fn active_mut(&mut self, turn: TurnId) -> Option<&mut Turn> {
        self.active.as_mut().filter(|active| active.id == turn)
    }

    /// Whether a stage result for `turn` at `stage` should be honored
    ///
    /// Results from superseded turns, canceled turns, or stages the turn
    /// has already left are stale.
    #[must_use]
    pub fn owns(&self, turn: TurnId, stage: AssistantState) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.id == turn && !active.canceled && active.state == stage)
    }

    /// Deactivate and return the active turn
    pub fn take_active(&mut self) -> Option<Turn> {
        self.active.take()
    }

    /// Append a finished exchange to the transcript
    pub fn commit(&mut self, turn: TurnId, user: String, assistant: String) {
        tracing::debug!(turn = %turn, exchanges = self.transcript.len() + 1, "exchange committed");
        self.transcript.push(Exchange {
            turn,
            user,
            assistant,
            committed_at: Utc::now(),
        });
    }

    /// Committed exchanges, oldest first
    #[must_use]
    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    /// Committed exchanges as chat messages, ready for a completion request
    #[must_use]
    pub fn history_messages(&self) -> Vec<ChatMessage> {
        self.transcript
            .iter()
            .flat_map(|exchange| {
                [
                    ChatMessage::user(exchange.user.clone()),
                    ChatMessage::assistant(exchange.assistant.clone()),
                ]
            })
            .collect()
    }

    /// Forget the committed transcript
    pub fn clear_history(&mut self) {
        tracing::info!(session = %self.id, exchanges = self.transcript.len(), "history cleared");
        self.transcript.clear();
    }
}
