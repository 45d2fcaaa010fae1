//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::TtsProvider;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Remote API endpoint and credential
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Transcription settings
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Speech synthesis settings
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Turn-taking policy
    #[serde(default)]
    pub turn: TurnFileConfig,

    /// Voice activity detection tuning
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Storage locations
    #[serde(default)]
    pub data: DataFileConfig,
}

/// Remote API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// API key (prefer `parley key set` or `GROQ_API_KEY`)
    pub key: Option<String>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Model (e.g. "whisper-large-v3-turbo")
    pub model: Option<String>,

    /// Language hint (e.g. "fr")
    pub language: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model (e.g. "gemma2-9b-it")
    pub model: Option<String>,

    /// System prompt sent ahead of the conversation
    pub system_prompt: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "synthesize"
    pub provider: Option<TtsProvider>,

    /// Endpoint URL (full URL for "synthesize", base URL for "openai")
    pub url: Option<String>,

    /// Model (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "fr-FR-DeniseNeural")
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    /// Utterances shorter than this many samples are discarded
    pub min_utterance_samples: Option<usize>,

    /// Playback safety timeout in seconds
    pub playback_timeout_secs: Option<u64>,

    /// Phrase a transcript must contain to get a reply
    pub wake_phrase: Option<String>,

    /// Phrase that ends the session
    pub end_phrase: Option<String>,

    /// Delay before listening restarts after a missing wake phrase
    pub restart_delay_ms: Option<u64>,

    /// Resume listening as soon as a reply starts playing
    pub resume_on_playback: Option<bool>,

    /// Pause listening while transcribing and completing
    pub pause_while_processing: Option<bool>,
}

/// VAD configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: Option<f32>,

    /// Voiced audio required for a segment to count as speech
    pub min_speech_ms: Option<u32>,

    /// Trailing silence that closes a segment
    pub redemption_ms: Option<u32>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct DataFileConfig {
    /// Directory holding the key store database
    pub dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    config_file_path().map_or_else(ParleyConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
