//! Error types for Parley

use std::fmt;

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Remote stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Speech-to-text
    Transcription,
    /// Chat completion
    Completion,
    /// Text-to-speech synthesis
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transcription => "transcription",
            Self::Completion => "completion",
            Self::Synthesis => "synthesis",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in Parley
#[derive(Debug, Error)]
pub enum Error {
    /// No credential configured
    #[error("no API key configured")]
    MissingCredential,

    /// Transport or non-success response from a remote collaborator
    #[error("{stage} request failed: {status}")]
    RemoteCallFailed {
        /// Stage that failed
        stage: Stage,
        /// Status line or transport error description
        status: String,
    },

    /// Operation was canceled (user barge-in, stop, or fencing)
    #[error("operation canceled")]
    Canceled,

    /// Microphone or voice detector could not be started
    #[error("voice detector failed to start: {0}")]
    DetectorInitFailed(String),

    /// Audio playback failed
    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    /// A request was submitted while another one is still outstanding
    #[error("{0} already has a request in flight")]
    Busy(&'static str),

    /// The turn controller has shut down
    #[error("assistant is not running")]
    Closed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Convert a stage-level error into the kind surfaced to observers
    ///
    /// Cancellation, missing credentials, and already-classified failures
    /// pass through; everything else becomes `RemoteCallFailed` for `stage`.
    #[must_use]
    pub fn into_stage_failure(self, stage: Stage) -> Self {
        match self {
            Self::Canceled
            | Self::MissingCredential
            | Self::PlaybackFailed(_)
            | Self::RemoteCallFailed { .. } => self,
            other => Self::RemoteCallFailed {
                stage,
                status: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_keeps_cancellation() {
        let err = Error::Canceled.into_stage_failure(Stage::Completion);
        assert!(err.is_canceled());
    }

    #[test]
    fn stage_failure_wraps_transport_errors() {
        let err = Error::Audio("broken pipe".to_string()).into_stage_failure(Stage::Transcription);
        match err {
            Error::RemoteCallFailed { stage, status } => {
                assert_eq!(stage, Stage::Transcription);
                assert!(status.contains("broken pipe"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
