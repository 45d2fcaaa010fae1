//! Configuration management for Parley
//!
//! Values resolve in priority order: environment, then the TOML file, then
//! built-in defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::ChatOptions;
use crate::turn::TurnPolicy;
use crate::voice::{
    DEFAULT_ENERGY_THRESHOLD, PhraseGate, SAMPLE_RATE, SttOptions, TtsOptions, TtsProvider,
    VadConfig,
};
use crate::{Error, Result};

use self::file::ParleyConfigFile;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Environment variable holding the API credential
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Key store entry holding the API credential
pub const API_KEY_STORE_KEY: &str = "groq-api-key";

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the key store database
    pub data_dir: PathBuf,

    /// API key from the environment or config file, if any
    pub api_key: Option<String>,

    /// Transcription client settings
    pub stt: SttOptions,

    /// Chat client settings
    pub chat: ChatOptions,

    /// Synthesis client settings
    pub tts: TtsOptions,

    /// Turn-taking settings
    pub turn: TurnConfig,

    /// Voice activity detection settings
    pub vad: VadSettings,
}

/// Turn-taking settings
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Utterances shorter than this many samples are discarded
    pub min_utterance_samples: usize,

    /// Playback safety timeout
    pub playback_timeout: Duration,

    /// Phrase a transcript must contain to get a reply (`None` disables)
    pub wake_phrase: Option<String>,

    /// Phrase that ends the session (`None` disables)
    pub end_phrase: Option<String>,

    /// Delay before listening restarts after a missing wake phrase
    pub restart_delay: Duration,

    /// Keep listening while a reply plays; when off the detector pauses
    /// for the whole playback
    pub resume_on_playback: bool,

    /// Pause listening while transcribing and completing
    pub pause_while_processing: bool,
}

/// Voice activity detection settings
#[derive(Debug, Clone, Copy)]
pub struct VadSettings {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,

    /// Voiced audio required for a segment to count as speech
    pub min_speech_ms: u32,

    /// Trailing silence that closes a segment
    pub redemption_ms: u32,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources<F>(fc: ParleyConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = env("PARLEY_API_BASE_URL")
            .or(fc.api.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let api_key = env(API_KEY_ENV)
            .or(fc.api.key)
            .filter(|key| !key.trim().is_empty());

        let stt = SttOptions {
            base_url: base_url.clone(),
            model: env("PARLEY_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-large-v3-turbo".to_string()),
            language: fc.stt.language.unwrap_or_else(|| "fr".to_string()),
            temperature: fc.stt.temperature.unwrap_or(0.0),
        };

        let chat = ChatOptions {
            base_url: base_url.clone(),
            model: env("PARLEY_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| "gemma2-9b-it".to_string()),
            system_prompt: fc.chat.system_prompt,
        };

        let tts_url = env("PARLEY_TTS_URL").or(fc.tts.url);
        let provider = match env("PARLEY_TTS_PROVIDER") {
            Some(value) => value.parse()?,
            // A bare endpoint URL means the plain synthesize service
            None => fc.tts.provider.unwrap_or(if tts_url.is_some() {
                TtsProvider::Synthesize
            } else {
                TtsProvider::OpenAi
            }),
        };
        let url = match (provider, tts_url) {
            (_, Some(url)) => url,
            (TtsProvider::OpenAi, None) => base_url,
            (TtsProvider::Synthesize, None) => {
                return Err(Error::Config(
                    "the synthesize TTS provider needs [tts] url or PARLEY_TTS_URL".to_string(),
                ));
            }
        };
        let tts = TtsOptions {
            provider,
            url,
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: env("PARLEY_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "fr-FR-DeniseNeural".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
        };

        let turn = TurnConfig {
            min_utterance_samples: fc.turn.min_utterance_samples.unwrap_or(100),
            playback_timeout: Duration::from_secs(fc.turn.playback_timeout_secs.unwrap_or(30)),
            wake_phrase: env("PARLEY_WAKE_PHRASE").or(fc.turn.wake_phrase),
            end_phrase: env("PARLEY_END_PHRASE")
                .or(fc.turn.end_phrase)
                .or_else(|| Some(crate::turn::DEFAULT_END_PHRASE.to_string())),
            restart_delay: Duration::from_millis(fc.turn.restart_delay_ms.unwrap_or(500)),
            resume_on_playback: fc.turn.resume_on_playback.unwrap_or(true),
            pause_while_processing: fc.turn.pause_while_processing.unwrap_or(false),
        };

        let vad = VadSettings {
            energy_threshold: fc.vad.energy_threshold.unwrap_or(DEFAULT_ENERGY_THRESHOLD),
            min_speech_ms: fc.vad.min_speech_ms.unwrap_or(250),
            redemption_ms: fc.vad.redemption_ms.unwrap_or(600),
        };

        // Data directory (~/.local/share/parley on Linux)
        let data_dir = env("PARLEY_DATA_DIR")
            .or(fc.data.dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("parley"))
            });

        Ok(Self {
            data_dir,
            api_key,
            stt,
            chat,
            tts,
            turn,
            vad,
        })
    }

    /// Path of the key store database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }

    /// Turn policy derived from the turn settings
    #[must_use]
    pub fn policy(&self) -> TurnPolicy {
        TurnPolicy {
            min_utterance_samples: self.turn.min_utterance_samples,
            playback_timeout: self.turn.playback_timeout,
            gate: PhraseGate::new(
                self.turn.wake_phrase.as_deref(),
                self.turn.end_phrase.as_deref(),
            ),
            restart_delay: self.turn.restart_delay,
            resume_on_playback: self.turn.resume_on_playback,
            pause_while_processing: self.turn.pause_while_processing,
        }
    }

    /// VAD tuning at the detector's sample rate
    #[must_use]
    pub fn vad_config(&self) -> VadConfig {
        VadConfig::from_millis(
            SAMPLE_RATE,
            self.vad.energy_threshold,
            self.vad.min_speech_ms,
            self.vad.redemption_ms,
        )
    }
}
