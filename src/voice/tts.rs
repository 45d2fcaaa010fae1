//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::inflight::InFlight;
use crate::error::Stage;
use crate::{Error, Result};

/// Synthesizes speech from reply text
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text`, returning playable audio bytes (WAV or MP3)
    ///
    /// # Errors
    ///
    /// Returns `Canceled` if [`Self::cancel`] is called first, `Busy` if a
    /// request is already outstanding, or `RemoteCallFailed` on transport
    /// and non-success responses
    async fn submit(&self, text: String, credential: &SecretString) -> Result<Vec<u8>>;

    /// Cancel the outstanding request; returns whether one was canceled
    fn cancel(&self) -> bool;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `POST {base}/audio/speech` with bearer auth
    #[default]
    OpenAi,
    /// Plain `POST {url}` with `{text, voice}`, no auth
    Synthesize,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "synthesize" => Ok(Self::Synthesize),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesis request settings
#[derive(Debug, Clone)]
pub struct TtsOptions {
    /// Which request shape to use
    pub provider: TtsProvider,
    /// Base URL (`OpenAi`) or full endpoint URL (`Synthesize`)
    pub url: String,
    /// Model name (`OpenAi` only)
    pub model: String,
    /// Fixed voice identifier
    pub voice: String,
    /// Speaking rate (`OpenAi` only)
    pub speed: f32,
}

/// HTTP speech synthesis client
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    options: TtsOptions,
    inflight: InFlight,
}

impl HttpTextToSpeech {
    /// Create a synthesis client
    #[must_use]
    pub fn new(options: TtsOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
            inflight: InFlight::new("synthesis"),
        }
    }

    async fn synthesize(&self, text: String, credential: &SecretString) -> Result<Vec<u8>> {
        tracing::debug!(
            chars = text.len(),
            provider = ?self.options.provider,
            "starting synthesis"
        );

        let request = match self.options.provider {
            TtsProvider::OpenAi => self.openai_request(&text, credential),
            TtsProvider::Synthesize => self.synthesize_request(&text),
        };

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "TTS API error");
            return Err(Error::RemoteCallFailed {
                stage: Stage::Synthesis,
                status: format!("{status}: {body}"),
            });
        }

        let audio = response.bytes().await?;
        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }

    fn openai_request(&self, text: &str, credential: &SecretString) -> reqwest::RequestBuilder {
        #[derive(Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let url = format!("{}/audio/speech", self.options.url.trim_end_matches('/'));
        self.client
            .post(url)
            .bearer_auth(credential.expose_secret())
            .json(&SpeechRequest {
                model: &self.options.model,
                input: text,
                voice: &self.options.voice,
                speed: self.options.speed,
            })
    }

    fn synthesize_request(&self, text: &str) -> reqwest::RequestBuilder {
        #[derive(Serialize)]
        struct SynthesizeRequest<'a> {
            text: &'a str,
            voice: &'a str,
        }

        self.client
            .post(&self.options.url)
            .json(&SynthesizeRequest {
                text,
                voice: &self.options.voice,
            })
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn submit(&self, text: String, credential: &SecretString) -> Result<Vec<u8>> {
        self.inflight
            .run(self.synthesize(text, credential))
            .await
            .map_err(|e| e.into_stage_failure(Stage::Synthesis))
    }

    fn cancel(&self) -> bool {
        self.inflight.cancel()
    }
}
