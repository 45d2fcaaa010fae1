//! Transcript phrase gates
//!
//! Checks a finished transcript for the end-session phrase and, when one is
//! configured, for the wake phrase that must address the assistant.
//! Matching is case-insensitive substring search.

/// What to do with a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Proceed to a completion
    Pass,
    /// The user asked to end the session
    EndSession,
    /// Wake phrase missing; discard and restart listening
    Rejected,
}

/// Wake-phrase and end-phrase matcher
#[derive(Debug, Clone, Default)]
pub struct PhraseGate {
    wake_phrase: Option<String>,
    end_phrase: Option<String>,
}

impl PhraseGate {
    /// Create a gate; `None` or blank phrases disable the matching check
    #[must_use]
    pub fn new(wake_phrase: Option<&str>, end_phrase: Option<&str>) -> Self {
        let normalize = |phrase: Option<&str>| {
            phrase
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
        };

        let gate = Self {
            wake_phrase: normalize(wake_phrase),
            end_phrase: normalize(end_phrase),
        };
        tracing::debug!(
            wake = ?gate.wake_phrase,
            end = ?gate.end_phrase,
            "phrase gate initialized"
        );
        gate
    }

    /// Classify a transcript
    ///
    /// The end phrase wins over the wake phrase.
    #[must_use]
    pub fn check(&self, transcript: &str) -> GateVerdict {
        let normalized = transcript.to_lowercase();

        if self
            .end_phrase
            .as_deref()
            .is_some_and(|end| normalized.contains(end))
        {
            tracing::info!(transcript, "end phrase detected");
            return GateVerdict::EndSession;
        }

        match self.wake_phrase.as_deref() {
            Some(wake) if !normalized.contains(wake) => {
                tracing::debug!(transcript, "wake phrase missing");
                GateVerdict::Rejected
            }
            _ => GateVerdict::Pass,
        }
    }

    /// Get the configured wake phrase
    #[must_use]
    pub fn wake_phrase(&self) -> Option<&str> {
        self.wake_phrase.as_deref()
    }

    /// Get the configured end phrase
    #[must_use]
    pub fn end_phrase(&self) -> Option<&str> {
        self.end_phrase.as_deref()
    }
}
